//! Document classification through a chat-completions model.

use crate::config::LlmSettings;
use crate::error::ClassifierError;
use crate::types::{Category, Classification, PageText};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const SINGLE_PROMPT: &str = r#"Classifique o documento de acordo com o conteúdo apresentado em uma das seguintes categorias:
- voucher: reserva de hotel, com número do quarto, nome do hóspede, data de check-in, valor, forma de pagamento e número do voucher.
- boleto: boleto bancário, com código de barras, data de vencimento, nosso número, cedente ou banco, agência e código do beneficiário, local de pagamento.
- nota_fiscal: nota fiscal de serviço, com CNPJ, descrição de produtos/serviços, impostos, tomador e prestador de serviços.
- descarte: qualquer documento que não se encaixa nas categorias acima.

Atribua também um índice de certeza entre 0 e 1:
- 0.9-1.0: certeza quase absoluta
- 0.7-0.9: alta confiança
- 0.5-0.7: confiança moderada
- 0.3-0.5: baixa confiança
- 0.0-0.3: confiança muito baixa

Responda apenas com um JSON neste formato:
{"tipo": "voucher", "indice_certeza": 0.95}

Conteúdo do documento:

{conteudo}"#;

const PAGES_PROMPT: &str = r#"Você está analisando um documento dividido por páginas; cada página começa com 'Página X:'.
Classifique cada página pelo conteúdo. Indícios por tipo:
- voucher: "Número de reserva", "Hóspede", "Quarto:", "check in", "arrival", "chegada", "Quarto nº"
- boleto: "Valor do Documento", "Juros/Multa", "Boleto", "Recibo do Pagador", "Local Pagamento", "Pagador"
- nota_fiscal: "NOTA FISCAL DE SERVIÇO ELETRÔNICA", "NÚMERO DA NOTA", "TOMADOR DE SERVIÇOS", "PRESTADOR DE SERVIÇOS", "CNAE"
- descarte: qualquer página que não se encaixa nos outros tipos.

Responda apenas com um JSON neste formato:
{"voucher": [1, 2], "boleto": [3], "nota_fiscal": [4, 5], "descarte": [6]}

Conteúdo do documento:

{conteudo}"#;

/// Raw model output plus token accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// The external text-generation boundary.
pub trait CompletionService {
    fn complete(&self, prompt: &str) -> Result<Completion, ClassifierError>;
}

/// Single-label classification of a document's text.
pub trait Classifier {
    fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}

/// Per-page labels for a whole document.
#[derive(Debug, Clone, PartialEq)]
pub enum PageAssignment {
    Assigned {
        pages: BTreeMap<Category, Vec<u32>>,
        tokens_in: u64,
        tokens_out: u64,
    },
    Unparsed {
        raw: String,
        tokens_in: u64,
        tokens_out: u64,
    },
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible `/chat/completions` client. One request per call, no retries.
pub struct OpenAiClient {
    settings: LlmSettings,
    api_key: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(settings: LlmSettings) -> Result<Self, ClassifierError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ClassifierError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ClassifierError::ExternalService(e.to_string()))?;
        Ok(Self {
            settings,
            api_key,
            client,
        })
    }
}

impl CompletionService for OpenAiClient {
    fn complete(&self, prompt: &str) -> Result<Completion, ClassifierError> {
        let url = format!("{}/chat/completions", self.settings.endpoint.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                ClassifierError::ExternalService(if e.is_connect() || e.is_timeout() {
                    format!("could not reach {} ({})", url, e)
                } else {
                    format!("network error: {}", e)
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(ClassifierError::ExternalService(format!(
                "request failed ({}): {}",
                status,
                if text.is_empty() { "invalid key or endpoint?" } else { text.as_str() }
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ClassifierError::ExternalService(format!("invalid response body: {}", e)))?;
        let usage = parsed.usage.unwrap_or(ChatUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifierError::ExternalService("response has no choices".to_string()))?;

        Ok(Completion {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

/// Removes a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let s = raw.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().replace(',', ".").parse::<f64>().ok()))
}

/// Parses `{"tipo": ..., "indice_certeza": ...}` (or `category`/`confidence`).
/// A missing confidence reads as 0.0; out-of-range values are clamped.
pub fn parse_classification(raw: &str) -> Option<(Category, f64)> {
    let value: Value = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let obj = value.as_object()?;
    let label = obj
        .get("tipo")
        .or_else(|| obj.get("category"))
        .and_then(|v| v.as_str())?;
    let category = Category::parse_label(label).filter(|c| !c.is_error())?;
    let confidence = obj
        .get("indice_certeza")
        .or_else(|| obj.get("confidence"))
        .and_then(as_f64)
        .unwrap_or(0.0);
    if !confidence.is_finite() {
        return None;
    }
    if !(0.0..=1.0).contains(&confidence) {
        warn!("confidence {} outside [0, 1], clamping", confidence);
    }
    Some((category, confidence.clamp(0.0, 1.0)))
}

/// Parses a `{category: [pages]}` mapping. Unknown keys are ignored.
pub fn parse_page_assignment(raw: &str) -> Option<BTreeMap<Category, Vec<u32>>> {
    let value: Value = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let obj = value.as_object()?;
    let mut out = BTreeMap::new();
    for (key, pages) in obj {
        let Some(category) = Category::parse_label(key).filter(|c| !c.is_error()) else {
            debug!("ignoring unknown page category {:?}", key);
            continue;
        };
        let mut numbers: Vec<u32> = pages
            .as_array()?
            .iter()
            .filter_map(|p| p.as_u64())
            .filter_map(|p| u32::try_from(p).ok())
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        out.insert(category, numbers);
    }
    Some(out)
}

pub fn build_single_prompt(text: &str) -> String {
    SINGLE_PROMPT.replace("{conteudo}", text)
}

pub fn build_pages_prompt(pages: &[PageText]) -> String {
    let content = pages
        .iter()
        .map(|p| format!("Página {}:\n{}", p.page_number, p.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    PAGES_PROMPT.replace("{conteudo}", &content)
}

/// Prompt building and response parsing on top of a `CompletionService`.
pub struct PageClassifier<S> {
    service: S,
}

impl<S: CompletionService> PageClassifier<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Assigns each page of the document to a category.
    pub fn classify_pages(&self, pages: &[PageText]) -> Result<PageAssignment, ClassifierError> {
        let completion = self.service.complete(&build_pages_prompt(pages))?;
        Ok(match parse_page_assignment(&completion.text) {
            Some(pages) => PageAssignment::Assigned {
                pages,
                tokens_in: completion.prompt_tokens,
                tokens_out: completion.completion_tokens,
            },
            None => {
                warn!("could not parse page assignment: {}", completion.text);
                PageAssignment::Unparsed {
                    raw: completion.text,
                    tokens_in: completion.prompt_tokens,
                    tokens_out: completion.completion_tokens,
                }
            }
        })
    }
}

impl<S: CompletionService> Classifier for PageClassifier<S> {
    fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let completion = self.service.complete(&build_single_prompt(text))?;
        match parse_classification(&completion.text) {
            Some((category, confidence)) => Ok(Classification {
                category,
                confidence,
                tokens_in: completion.prompt_tokens,
                tokens_out: completion.completion_tokens,
                raw_response: None,
            }),
            None => {
                warn!("could not parse classification: {}", completion.text);
                Ok(Classification::unparsed(
                    completion.text,
                    completion.prompt_tokens,
                    completion.completion_tokens,
                ))
            }
        }
    }
}

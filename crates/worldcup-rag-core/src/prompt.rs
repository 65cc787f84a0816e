//! Prompt assembly and answer post-processing.

use crate::retrieve::ScoredChunk;

/// Default prompt. `{context}` and `{question}` are substituted by
/// [`build_prompt`].
pub const DEFAULT_TEMPLATE: &str = "\
Você é um assistente especializado em Copa do Mundo FIFA.
Responda em português usando APENAS as informações do contexto abaixo.
Se a resposta não estiver no contexto, diga que não sabe.
Atenção: o país SEDE (anfitrião) de uma Copa não é necessariamente o CAMPEÃO.
Quando a pergunta for sobre quem ganhou, responda com o campeão; quando for
sobre onde foi realizada, responda com a sede. Nunca confunda os dois.

Contexto:
{context}

PERGUNTA: {question}

Resposta:";

/// Separator between context chunks.
const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Fill `template` with the retrieved chunks and the user question.
pub fn build_prompt(template: &str, chunks: &[ScoredChunk], question: &str) -> String {
    let context = chunks
        .iter()
        .map(|c| c.chunk.text.trim())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    template
        .replace("{context}", &context)
        .replace("{question}", question.trim())
}

/// Labels a model may prefix its answer with.
const ANSWER_LABELS: &[&str] = &["resposta:", "answer:", "assistant:", "assistente:"];

/// Section headers that mean the model started echoing the prompt. Only
/// recognized at the start of a line.
const ECHO_MARKERS: &[&str] = &["pergunta:", "question:", "contexto:", "context:"];

const SPECIAL_TOKENS: &[&str] = &["</s>", "<s>", "[INST]", "[/INST]"];

/// Strip leaked template artifacts from raw model output.
///
/// Removes special tokens (`<|...|>`, `</s>`, `[INST]`), leading answer
/// labels, and anything from an echoed prompt section onwards. A section
/// only counts as echoed when its header opens a line, so "com base no
/// contexto: ..." inside a sentence is kept. Returns the trimmed result,
/// which may be empty.
pub fn clean_answer(raw: &str) -> String {
    let mut text = strip_pipe_tokens(raw);
    for token in SPECIAL_TOKENS {
        text = text.replace(token, "");
    }

    let mut text = text.trim();
    loop {
        let lower = text.to_lowercase();
        match ANSWER_LABELS.iter().find(|l| lower.starts_with(**l)) {
            // labels are ASCII so the byte length is the same in both cases
            Some(label) => text = text[label.len()..].trim_start(),
            None => break,
        }
    }

    let cut = echo_start(text).unwrap_or(text.len());
    text[..cut].trim().to_string()
}

/// Byte offset of the first line that opens an echoed prompt section.
fn echo_start(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let head = line.trim().to_lowercase();
        if head == "---" || ECHO_MARKERS.iter().any(|m| head.starts_with(m)) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Remove `<|...|>` tokens.
fn strip_pipe_tokens(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("<|") {
        out.push_str(&rest[..start]);
        match rest[start..].find("|>") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

//! Knowledge Q&A: answer a free-form question from the knowledge base
//! and keep the exchange in the history table.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::knowledge::{KnowledgeBase, KnowledgeHit};
use crate::llm::LlmClient;
use crate::prompts;
use crate::records::RecordStore;

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub references: Vec<String>,
}

fn format_hit(hit: &KnowledgeHit) -> String {
    let mut origin = hit.metadata.source.clone();
    if let Some(sheet) = &hit.metadata.sheet {
        origin.push_str(&format!(", sheet {}", sheet));
    }
    if let Some(row) = hit.metadata.row {
        origin.push_str(&format!(", row {}", row));
    }
    format!(
        "(source: {}, similarity {:.1}%)\n{}",
        origin, hit.similarity, hit.content
    )
}

/// Answer `question`. Caller-selected `contexts` are used as-is; otherwise
/// up to `reference_count` hits above the configured floor are retrieved.
pub async fn ask(
    kb: &KnowledgeBase,
    llm: &dyn LlmClient,
    store: &RecordStore,
    question: &str,
    contexts: Option<Vec<String>>,
    reference_count: usize,
) -> Result<Answer> {
    let question = question.trim();
    anyhow::ensure!(!question.is_empty(), "Question is empty");

    let references = match contexts {
        Some(contexts) => contexts
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect(),
        None => kb
            .search(question, reference_count, Some(kb.retrieval().min_similarity))
            .await
            .context("Knowledge search failed")?
            .iter()
            .map(format_hit)
            .collect::<Vec<_>>(),
    };

    let answer = llm
        .complete(&prompts::knowledge_answer(question, &references))
        .await
        .context("Answer generation failed")?;
    let id = store.add_qa(question, &answer, references.len()).await?;
    info!(qa = id, references = references.len(), "answered knowledge question");

    Ok(Answer {
        id,
        question: question.to_string(),
        answer,
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::config::Config;
    use crate::embedding::HashEmbedder;
    use crate::llm::ChatMessage;
    use crate::{db, migrate};

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LlmClient for Recording {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok("Passwords need at least 8 chars.".to_string())
        }
    }

    async fn setup(tmp: &TempDir) -> (KnowledgeBase, RecordStore) {
        let config = Config::with_data_dir(tmp.path());
        config.ensure_dirs().unwrap();
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        let kb = KnowledgeBase::open(&config, Arc::new(HashEmbedder::new(256)))
            .await
            .unwrap();
        (kb, RecordStore::new(pool))
    }

    #[tokio::test]
    async fn test_ask_with_explicit_contexts_saves_history() {
        let tmp = TempDir::new().unwrap();
        let (kb, store) = setup(&tmp).await;
        let llm = Recording::default();

        let answer = ask(
            &kb,
            &llm,
            &store,
            " How long must a password be? ",
            Some(vec!["password >= 8 chars".to_string(), " ".to_string()]),
            3,
        )
        .await
        .unwrap();

        assert_eq!(answer.references.len(), 1);
        assert_eq!(answer.question, "How long must a password be?");
        let seen = llm.seen.lock().unwrap();
        assert!(seen[0][1].content.contains("[1] password >= 8 chars"));

        let history = store.list_qa(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reference_count, 1);
    }

    #[tokio::test]
    async fn test_ask_on_empty_knowledge_base_has_no_references() {
        let tmp = TempDir::new().unwrap();
        let (kb, store) = setup(&tmp).await;
        let llm = Recording::default();
        let answer = ask(&kb, &llm, &store, "anything?", None, 3).await.unwrap();
        assert!(answer.references.is_empty());
        assert_eq!(llm.seen.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let tmp = TempDir::new().unwrap();
        let (kb, store) = setup(&tmp).await;
        assert!(ask(&kb, &Recording::default(), &store, "  ", None, 3).await.is_err());
    }
}

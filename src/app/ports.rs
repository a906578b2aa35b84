use async_trait::async_trait;

use crate::error::ClassifierError;

/// Raw reply of one classifier call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassifierResponse {
    pub text: String,
    pub prompt_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// External LLM classifier. One call carries a whole batch prompt.
#[async_trait]
pub trait ExtractionClassifier: Send + Sync {
    async fn classify(
        &self,
        model: &str,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<ClassifierResponse, ClassifierError>;
}

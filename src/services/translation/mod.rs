pub mod api_client;
pub mod cache;

pub use api_client::HttpTranslationGateway;
pub use cache::CachedGateway;

use crate::core::errors::TranslationResult;
use async_trait::async_trait;

/// External translation service bound to one target language.
///
/// The source language is fixed by the deployment; callers only hand over
/// recognized text.
#[async_trait]
pub trait TranslationGateway: Send + Sync {
    /// Whether calls are currently expected to succeed. The pipeline refuses
    /// captures while this is false.
    fn is_ready(&self) -> bool {
        true
    }

    fn target_language(&self) -> &str;

    async fn translate(&self, text: &str) -> TranslationResult<String>;
}

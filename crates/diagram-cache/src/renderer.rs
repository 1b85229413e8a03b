//! The expensive operation the cache sits in front of

use crate::error::GenerationError;
use crate::types::DiagramType;
use async_trait::async_trait;

/// Produces the rendered bytes for a diagram expression.
///
/// Called without any cache lock held; implementations may run for a long
/// time and are not cancelled or timed out by the cache.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        diagram_type: DiagramType,
        expression: &str,
    ) -> std::result::Result<Vec<u8>, GenerationError>;
}

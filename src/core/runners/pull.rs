use crate::error::{Error, Result};

use super::super::cancel::CancelToken;
use super::super::events::Event;
use super::RunContext;

/// Fetch an external image unless it is already present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullJob {
    pub image: String,
}

impl PullJob {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    pub(super) fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let wrap = |source: Error| match source {
            Error::Cancelled => Error::Cancelled,
            source => Error::ImagePullFailed {
                image: self.image.clone(),
                source: Box::new(source),
            },
        };

        if ctx.engine.image_exists(&self.image, cancel).map_err(wrap)? {
            return Ok(());
        }
        ctx.engine.pull_image(&self.image, cancel).map_err(wrap)?;
        ctx.emit(Event::ImagePulled {
            image: self.image.clone(),
        });
        Ok(())
    }
}

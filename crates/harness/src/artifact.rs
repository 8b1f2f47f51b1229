//! Failure artifact collection

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use testgrid_common::ArtifactCapture;
use tracing::{debug, error, info};

use crate::error::{HarnessError, HarnessResult};
use crate::session::SharedContext;

/// Captures screenshots of failed tests into the screenshot directory
#[derive(Debug, Clone)]
pub struct ArtifactCollector {
    dir: PathBuf,
}

impl ArtifactCollector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot the context for `test_name`. Never fails: a missing UI
    /// context yields `None` silently, any other problem is logged and also
    /// yields `None`.
    pub fn capture(&self, context: Option<&SharedContext>, test_name: &str) -> Option<ArtifactCapture> {
        let Some(context) = context else {
            debug!("No UI context for {}; skipping screenshot", test_name);
            return None;
        };

        match self.try_capture(context, test_name) {
            Ok(artifact) => {
                info!("Screenshot captured: {}", artifact.path.display());
                Some(artifact)
            }
            Err(e) => {
                error!("Failed to capture screenshot for {}: {}", test_name, e);
                None
            }
        }
    }

    fn try_capture(&self, context: &SharedContext, test_name: &str) -> HarnessResult<ArtifactCapture> {
        let bytes = {
            let mut ctx = context.lock();
            if !ctx.is_alive() {
                return Err(HarnessError::ArtifactCapture(format!(
                    "context {} is no longer alive",
                    ctx.session_id()
                )));
            }
            ctx.session_mut().screenshot()?
        };

        fs::create_dir_all(&self.dir)?;

        let captured_at = Utc::now();
        let path = self.dir.join(format!(
            "{}_{}.png",
            file_safe(test_name),
            captured_at.timestamp_millis()
        ));
        fs::write(&path, &bytes)?;

        Ok(ArtifactCapture {
            test_name: test_name.to_string(),
            captured_at,
            path,
            size_bytes: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&bytes)),
        })
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

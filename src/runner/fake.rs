//! Scriptable runner for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::Result;
use crate::coverage::CoverageResult;

use super::{RunRequest, TestRunner};

type Script = Box<dyn Fn(&RunRequest) -> Result<CoverageResult> + Send + Sync>;

/// Answers each request with a closure and records what it was asked.
pub struct FakeRunner {
    script: Script,
    requests: Mutex<Vec<RunRequest>>,
}

impl FakeRunner {
    pub fn new(script: impl Fn(&RunRequest) -> Result<CoverageResult> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl TestRunner for FakeRunner {
    fn repo_name(&self) -> &str {
        "fake"
    }

    async fn run(&self, request: RunRequest) -> Result<CoverageResult> {
        self.requests.lock().push(request.clone());
        (self.script)(&request)
    }
}

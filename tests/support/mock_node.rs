use anyhow::Result;
use futures::future::BoxFuture;
use mineloop::rpc::client::{NodeClient, SubmitOutcome};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted stand-in for the upstream node. Templates and submit outcomes
/// are served in order; the last template repeats once the script runs dry.
pub struct MockNode {
    templates: Mutex<VecDeque<Value>>,
    submit_outcomes: Mutex<VecDeque<SubmitOutcome>>,
    submissions: AtomicUsize,
    best_hash: Mutex<String>,
}

impl MockNode {
    pub fn new(templates: Vec<Value>) -> Self {
        Self {
            templates: Mutex::new(templates.into()),
            submit_outcomes: Mutex::new(VecDeque::new()),
            submissions: AtomicUsize::new(0),
            best_hash: Mutex::new("genesis".to_string()),
        }
    }

    pub fn script_submit_outcome(&self, outcome: SubmitOutcome) {
        self.submit_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn set_best_hash(&self, hash: &str) {
        *self.best_hash.lock().unwrap() = hash.to_string();
    }
}

impl NodeClient for MockNode {
    fn fetch_template<'a>(&'a self) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async {
            let mut templates = self.templates.lock().unwrap();
            let template = match templates.len() {
                0 => Value::Null,
                1 => templates.front().cloned().unwrap_or(Value::Null),
                _ => templates.pop_front().unwrap_or(Value::Null),
            };
            Ok(template)
        })
    }

    fn submit_candidate<'a>(&'a self, _payload: &'a Value) -> BoxFuture<'a, Result<SubmitOutcome>> {
        Box::pin(async {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .submit_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SubmitOutcome::Accepted);
            Ok(outcome)
        })
    }

    fn best_block_hash<'a>(&'a self) -> BoxFuture<'a, Result<String>> {
        Box::pin(async { Ok(self.best_hash.lock().unwrap().clone()) })
    }
}

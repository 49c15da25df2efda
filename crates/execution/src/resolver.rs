//! Parameter token resolution.
//!
//! Task addresses and payloads may contain `{scope.path}` tokens:
//!
//! ```text
//! {system.api_host}        process-wide system param
//! {job.item_id}            job input param
//! {task.create_order.id}   param `id` of the task with code `create_order`
//! ```
//!
//! Resolution reads from a [`Scope`] snapshot, never from live job state, so
//! a worker can substitute while the aggregator keeps updating tasks.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use jobworker_core::{lookup, Job, Param, SystemParams, Task};
use regex::Regex;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[a-z.0-9_]+\}").expect("token pattern is valid"))
}

/// Immutable view of every value a token can resolve to.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    system: Arc<SystemParams>,
    job: Vec<Param>,
    tasks: Vec<(String, Vec<Param>)>,
}

impl Scope {
    /// Snapshot the job's params and every task's params, in task order.
    pub fn new(system: Arc<SystemParams>, job: &Job, tasks: &[Task]) -> Self {
        Self {
            system,
            job: job.params.clone(),
            tasks: tasks.iter().map(|t| (t.code.clone(), t.params.clone())).collect(),
        }
    }

    /// System params this scope was built with.
    pub fn system(&self) -> &SystemParams {
        &self.system
    }
}

/// All tokens in `text`, in order of appearance, duplicates kept.
pub fn referenced_tokens(text: &str) -> Vec<String> {
    token_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Resolve one token (with or without braces). Unknown references yield `""`.
pub fn resolve(scope: &Scope, token: &str) -> String {
    let inner = token.trim_start_matches('{').trim_end_matches('}');
    let Some((kind, rest)) = inner.split_once('.') else {
        return String::new();
    };

    match kind {
        "system" => scope.system.value(rest),
        "job" => lookup(&scope.job, rest),
        "task" => {
            let Some((code, key)) = rest.split_once('.') else {
                return String::new();
            };
            scope
                .tasks
                .iter()
                .find(|(c, _)| c == code)
                .map(|(_, params)| lookup(params, key))
                .unwrap_or_default()
        }
        _ => String::new(),
    }
}

/// Replace every token in the task's address and payload.
pub fn substitute(task: &mut Task, scope: &Scope) {
    substitute_pair(&mut task.address, &mut task.payload, scope);
}

/// Replace every token in the task's rollback address and payload.
pub fn substitute_rollback(task: &mut Task, scope: &Scope) {
    substitute_pair(&mut task.rollback_address, &mut task.rollback_payload, scope);
}

fn substitute_pair(address: &mut String, payload: &mut String, scope: &Scope) {
    let mut tokens = referenced_tokens(address);
    tokens.extend(referenced_tokens(payload));
    if tokens.is_empty() {
        return;
    }

    let mut values: HashMap<String, String> = HashMap::new();
    for token in tokens {
        if values.contains_key(&token) {
            continue;
        }
        let value = resolve(scope, &token);
        *address = address.replace(&token, &value);
        *payload = payload.replace(&token, &value);
        values.insert(token, value);
    }
}

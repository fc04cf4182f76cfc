//! Scripted gateway for testing

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{CommandGateway, CommandOutput, GatewayError, ResourceKind, ResourceQuery, ResourceRef};

type GetResponse = Result<serde_json::Value, GatewayError>;

/// A call observed by [`FakeGateway`]
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Execute(Vec<String>),
    Whoami,
    Create(serde_json::Value),
    Delete(ResourceRef),
    Exec(ResourceRef, Vec<String>),
    Get(ResourceQuery),
    Logs(ResourceRef),
}

/// Gateway returning pre-configured responses and recording every call
///
/// `get` responses are queued per key; the last queued response repeats once
/// the queue is drained down to it.
pub struct FakeGateway {
    whoami: Mutex<CommandOutput>,
    gets: Mutex<HashMap<String, VecDeque<GetResponse>>>,
    create: Mutex<Result<(), GatewayError>>,
    delete: Mutex<Result<(), GatewayError>>,
    exec_default: Mutex<CommandOutput>,
    exec_rules: Mutex<Vec<(String, CommandOutput)>>,
    /// Panic inside `exec`, for teardown-on-unwind tests
    pub panic_on_exec: AtomicBool,
    /// Panic inside `get` for named queries
    panic_on_named_get: AtomicBool,
    logs: Mutex<CommandOutput>,
    calls: Mutex<Vec<GatewayCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn list_key(kind: ResourceKind) -> String {
    kind.plural.to_string()
}

fn named_key(kind: ResourceKind, name: &str) -> String {
    format!("{}/{}", kind.plural, name)
}

impl FakeGateway {
    /// Create a gateway with a logged-in session and empty cluster
    pub fn new() -> Self {
        Self {
            whoami: Mutex::new(CommandOutput::success("system:admin\n")),
            gets: Mutex::new(HashMap::new()),
            create: Mutex::new(Ok(())),
            delete: Mutex::new(Ok(())),
            exec_default: Mutex::new(CommandOutput::success("")),
            exec_rules: Mutex::new(Vec::new()),
            panic_on_exec: AtomicBool::new(false),
            panic_on_named_get: AtomicBool::new(false),
            logs: Mutex::new(CommandOutput::success("")),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Set the identity check response
    pub fn set_whoami(&self, output: CommandOutput) {
        *lock(&self.whoami) = output;
    }

    fn push_get(&self, key: String, response: GetResponse) {
        lock(&self.gets).entry(key).or_default().push_back(response);
    }

    /// Queue a response for a collection query of `kind`
    pub fn respond_list(&self, kind: ResourceKind, response: GetResponse) {
        self.push_get(list_key(kind), response);
    }

    /// Queue a response for a named query
    pub fn respond_named(&self, kind: ResourceKind, name: &str, response: GetResponse) {
        self.push_get(named_key(kind, name), response);
    }

    /// Queue a response for any named query of `kind` without its own script
    pub fn respond_any_named(&self, kind: ResourceKind, response: GetResponse) {
        self.push_get(named_key(kind, "*"), response);
    }

    pub fn set_create(&self, response: Result<(), GatewayError>) {
        *lock(&self.create) = response;
    }

    pub fn set_delete(&self, response: Result<(), GatewayError>) {
        *lock(&self.delete) = response;
    }

    /// Default response for `exec`
    pub fn set_exec(&self, output: CommandOutput) {
        *lock(&self.exec_default) = output;
    }

    /// `exec` response for workloads whose name contains `pattern`
    pub fn set_exec_matching(&self, pattern: &str, output: CommandOutput) {
        lock(&self.exec_rules).push((pattern.to_string(), output));
    }

    pub fn set_logs(&self, output: CommandOutput) {
        *lock(&self.logs) = output;
    }

    pub fn set_panic_on_exec(&self, panic: bool) {
        self.panic_on_exec.store(panic, Ordering::SeqCst);
    }

    pub fn set_panic_on_named_get(&self, panic: bool) {
        self.panic_on_named_get.store(panic, Ordering::SeqCst);
    }

    /// All calls observed so far
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, GatewayCall::Create(_)))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, GatewayCall::Delete(_)))
    }

    pub fn exec_count(&self) -> usize {
        self.count(|c| matches!(c, GatewayCall::Exec(..)))
    }

    /// Manifests passed to `create`, in call order
    pub fn created_manifests(&self) -> Vec<serde_json::Value> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Create(manifest) => Some(manifest.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&GatewayCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }

    fn next_get(&self, query: &ResourceQuery) -> GetResponse {
        let mut gets = lock(&self.gets);
        let keys = match &query.name {
            Some(name) => vec![named_key(query.kind, name), named_key(query.kind, "*")],
            None => vec![list_key(query.kind)],
        };

        for key in keys {
            if let Some(queue) = gets.get_mut(&key) {
                if queue.len() > 1 {
                    if let Some(response) = queue.pop_front() {
                        return response;
                    }
                }
                if let Some(response) = queue.front() {
                    return response.clone();
                }
            }
        }

        Err(GatewayError::NotFound(query.to_string()))
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandGateway for FakeGateway {
    async fn execute(&self, args: &[String]) -> CommandOutput {
        self.record(GatewayCall::Execute(args.to_vec()));
        CommandOutput::failure(127, format!("no scripted response for: {}", args.join(" ")))
    }

    async fn whoami(&self) -> CommandOutput {
        self.record(GatewayCall::Whoami);
        lock(&self.whoami).clone()
    }

    async fn create(&self, manifest: &serde_json::Value) -> Result<(), GatewayError> {
        self.record(GatewayCall::Create(manifest.clone()));
        lock(&self.create).clone()
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), GatewayError> {
        self.record(GatewayCall::Delete(target.clone()));
        lock(&self.delete).clone()
    }

    async fn exec(&self, target: &ResourceRef, command: &[String]) -> CommandOutput {
        self.record(GatewayCall::Exec(target.clone(), command.to_vec()));
        if self.panic_on_exec.load(Ordering::SeqCst) {
            panic!("scripted exec panic for {}", target);
        }
        let rules = lock(&self.exec_rules);
        match rules.iter().find(|(pattern, _)| target.name.contains(pattern.as_str())) {
            Some((_, output)) => output.clone(),
            None => lock(&self.exec_default).clone(),
        }
    }

    async fn get(&self, query: &ResourceQuery) -> Result<serde_json::Value, GatewayError> {
        self.record(GatewayCall::Get(query.clone()));
        if query.name.is_some() && self.panic_on_named_get.load(Ordering::SeqCst) {
            panic!("scripted get panic for {:?}", query.name);
        }
        self.next_get(query)
    }

    async fn logs(&self, target: &ResourceRef) -> CommandOutput {
        self.record(GatewayCall::Logs(target.clone()));
        lock(&self.logs).clone()
    }
}

//! Test doubles for the tunnel's seams

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service, ServiceStatus};
use mk_core::config::{ClusterProfile, KubernetesConfig};
use mk_core::error::{InspectError, PatchError};
use mk_core::{HostState, ProcessProbe, TunnelStatus};
use serde_json::Value;

use crate::cluster::{MachineDriver, ProfileStore, SshEndpoint};
use crate::command::{display_command, CommandOutput, CommandRunner};
use crate::forward::{ForwardProcess, ForwardSpec, ForwarderSpawner};
use crate::loadbalancer::{service, ServiceClient};
use crate::report::Reporter;

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        status: Some(2),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Simulates `ip r` and `sudo ip route add/delete` against an in-memory table
#[derive(Default)]
pub struct FakeRouteShell {
    inner: Mutex<RouteShellState>,
}

#[derive(Default)]
struct RouteShellState {
    lines: Vec<String>,
    mutations: Vec<String>,
    fail_with: Option<String>,
}

impl FakeRouteShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(lines: &[&str]) -> Self {
        let shell = Self::new();
        shell.inner.lock().unwrap().lines = lines.iter().map(|l| l.to_string()).collect();
        shell
    }

    /// Mutating commands received so far
    pub fn mutations(&self) -> Vec<String> {
        self.inner.lock().unwrap().mutations.clone()
    }

    /// Make every later add or delete fail with `stderr`
    pub fn fail_mutations(&self, stderr: &str) {
        self.inner.lock().unwrap().fail_with = Some(stderr.to_string());
    }
}

#[async_trait]
impl CommandRunner for FakeRouteShell {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let command = display_command(program, args);
        let mut state = self.inner.lock().unwrap();
        let words: Vec<&str> = command.split_whitespace().collect();

        match words.as_slice() {
            ["ip", "r"] => {
                let mut table = state.lines.join("\n");
                table.push('\n');
                Ok(CommandOutput::ok(table))
            }
            ["sudo", "ip", "route", "add", cidr, "via", gw] => {
                state.mutations.push(command.clone());
                if let Some(stderr) = &state.fail_with {
                    return Ok(failed(stderr));
                }
                let exists = state
                    .lines
                    .iter()
                    .any(|l| l.split_whitespace().next() == Some(*cidr));
                if exists {
                    return Ok(failed("RTNETLINK answers: File exists\n"));
                }
                let line = format!("{} via {} dev virbr1", cidr, gw);
                state.lines.push(line);
                Ok(CommandOutput::ok(""))
            }
            ["sudo", "ip", "route", "delete", cidr] => {
                state.mutations.push(command.clone());
                if let Some(stderr) = &state.fail_with {
                    return Ok(failed(stderr));
                }
                let before = state.lines.len();
                state
                    .lines
                    .retain(|l| l.split_whitespace().next() != Some(*cidr));
                if state.lines.len() == before {
                    return Ok(failed("RTNETLINK answers: No such process\n"));
                }
                Ok(CommandOutput::ok(""))
            }
            _ => Err(io::Error::new(io::ErrorKind::NotFound, command)),
        }
    }
}

/// Answers commands by prefix with canned output
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), output));
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let command = display_command(program, args);
        self.responses
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, command))
    }
}

/// Probe that reports a fixed set of PIDs as alive
pub struct AliveSet {
    alive: Mutex<HashSet<u32>>,
}

impl AliveSet {
    pub fn new(pids: &[u32]) -> Self {
        Self {
            alive: Mutex::new(pids.iter().copied().collect()),
        }
    }
}

impl ProcessProbe for AliveSet {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}

/// Machine driver with settable state and IP
pub struct StubDriver {
    inner: Mutex<DriverState>,
}

struct DriverState {
    state: Result<HostState, String>,
    ip: String,
    endpoint_queries: usize,
}

impl StubDriver {
    pub fn running(ip: &str) -> Self {
        Self {
            inner: Mutex::new(DriverState {
                state: Ok(HostState::Running),
                ip: ip.to_string(),
                endpoint_queries: 0,
            }),
        }
    }

    pub fn set_state(&self, state: HostState) {
        self.inner.lock().unwrap().state = Ok(state);
    }

    pub fn set_ip(&self, ip: &str) {
        self.inner.lock().unwrap().ip = ip.to_string();
    }

    pub fn fail_state(&self, message: &str) {
        self.inner.lock().unwrap().state = Err(message.to_string());
    }

    pub fn endpoint_queries(&self) -> usize {
        self.inner.lock().unwrap().endpoint_queries
    }
}

#[async_trait]
impl MachineDriver for StubDriver {
    async fn state(&self, name: &str) -> Result<HostState, InspectError> {
        self.inner
            .lock()
            .unwrap()
            .state
            .clone()
            .map_err(|message| InspectError::Machine {
                name: name.to_string(),
                message,
            })
    }

    async fn ip(&self, _name: &str) -> Result<String, InspectError> {
        Ok(self.inner.lock().unwrap().ip.clone())
    }

    async fn ssh_endpoint(&self, _name: &str) -> Result<SshEndpoint, InspectError> {
        self.inner.lock().unwrap().endpoint_queries += 1;
        Ok(SshEndpoint {
            host: "127.0.0.1".to_string(),
            port: 50022,
        })
    }
}

/// Profile store serving one service CIDR for every name
pub struct StubProfiles {
    service_cidr: String,
}

impl StubProfiles {
    pub fn with_cidr(cidr: &str) -> Self {
        Self {
            service_cidr: cidr.to_string(),
        }
    }
}

impl ProfileStore for StubProfiles {
    fn load(&self, name: &str) -> Result<ClusterProfile, InspectError> {
        Ok(ClusterProfile {
            name: name.to_string(),
            driver: "docker".to_string(),
            kubernetes_config: KubernetesConfig {
                service_cidr: self.service_cidr.clone(),
            },
        })
    }
}

/// In-memory service list that applies ingress patches
pub struct FakeServiceClient {
    inner: Mutex<ServiceState>,
}

struct ServiceState {
    services: Vec<Service>,
    patches: Vec<(String, Value)>,
    denied: HashSet<String>,
    list_error: Option<String>,
}

impl FakeServiceClient {
    pub fn new(services: Vec<Service>) -> Self {
        Self {
            inner: Mutex::new(ServiceState {
                services,
                patches: Vec::new(),
                denied: HashSet::new(),
                list_error: None,
            }),
        }
    }

    pub fn set_services(&self, services: Vec<Service>) {
        self.inner.lock().unwrap().services = services;
    }

    pub fn deny_patch(&self, name: &str) {
        self.inner.lock().unwrap().denied.insert(name.to_string());
    }

    pub fn fail_list(&self, message: &str) {
        self.inner.lock().unwrap().list_error = Some(message.to_string());
    }

    /// Patch requests received, including denied ones
    pub fn patch_count(&self) -> usize {
        self.inner.lock().unwrap().patches.len()
    }

    /// Ingress IPs of the named service
    pub fn ingress(&self, name: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .services
            .iter()
            .find(|svc| service::name(svc) == name)
            .map(|svc| service::ingress_ips(svc).into_iter().map(String::from).collect())
            .unwrap_or_default()
    }
}

fn apply_patch(svc: &mut Service, patch: &Value) {
    let op = &patch[0];
    let ingress = match op["op"].as_str() {
        Some("add") => Some(
            op["value"]
                .as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| LoadBalancerIngress {
                            ip: entry["ip"].as_str().map(String::from),
                            ..Default::default()
                        })
                        .collect()
                })
                .unwrap_or_default(),
        ),
        _ => None,
    };

    let status = svc.status.get_or_insert_with(ServiceStatus::default);
    status.load_balancer = Some(LoadBalancerStatus { ingress });
}

#[async_trait]
impl ServiceClient for FakeServiceClient {
    async fn list_services(&self) -> Result<Vec<Service>, PatchError> {
        let state = self.inner.lock().unwrap();
        match &state.list_error {
            Some(message) => Err(PatchError::List(message.clone())),
            None => Ok(state.services.clone()),
        }
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<(), PatchError> {
        let mut state = self.inner.lock().unwrap();
        state.patches.push((name.to_string(), patch.clone()));
        if state.denied.contains(name) {
            return Err(PatchError::Patch {
                service: name.to_string(),
                message: "services \"status\" is forbidden".to_string(),
            });
        }
        if let Some(svc) = state
            .services
            .iter_mut()
            .find(|svc| service::name(svc) == name)
        {
            apply_patch(svc, &patch);
        }
        Ok(())
    }
}

#[derive(Default)]
struct SpawnLog {
    spawned: Vec<String>,
    stopped: Vec<String>,
    exit_flags: Vec<Arc<AtomicBool>>,
    fail: bool,
}

/// Spawner whose processes live until stopped or told to exit
#[derive(Default)]
pub struct FakeSpawner {
    log: Arc<Mutex<SpawnLog>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.log.lock().unwrap().spawned.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.log.lock().unwrap().stopped.clone()
    }

    /// Make every process spawned so far exit on its own
    pub fn exit_all(&self) {
        for flag in &self.log.lock().unwrap().exit_flags {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.log.lock().unwrap().fail = fail;
    }
}

impl ForwarderSpawner for FakeSpawner {
    fn spawn(
        &self,
        _endpoint: &SshEndpoint,
        spec: &ForwardSpec,
    ) -> io::Result<Box<dyn ForwardProcess>> {
        let mut log = self.log.lock().unwrap();
        if log.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "ssh not found"));
        }
        let exited = Arc::new(AtomicBool::new(false));
        log.spawned.push(spec.service.clone());
        log.exit_flags.push(Arc::clone(&exited));

        Ok(Box::new(FakeProcess {
            service: spec.service.clone(),
            exited,
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeProcess {
    service: String,
    exited: Arc<AtomicBool>,
    log: Arc<Mutex<SpawnLog>>,
}

#[async_trait]
impl ForwardProcess for FakeProcess {
    fn try_exited(&mut self) -> Option<String> {
        self.exited
            .load(Ordering::SeqCst)
            .then(|| "exit status: 255".to_string())
    }

    async fn stop(self: Box<Self>) {
        self.log.lock().unwrap().stopped.push(self.service.clone());
    }
}

/// Keeps every snapshot it receives
#[derive(Clone, Default)]
pub struct RecordingReporter {
    snapshots: Arc<Mutex<Vec<TunnelStatus>>>,
}

impl RecordingReporter {
    pub fn snapshots(&self) -> Vec<TunnelStatus> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<TunnelStatus> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

impl Reporter for RecordingReporter {
    fn report(&mut self, status: &TunnelStatus) {
        self.snapshots.lock().unwrap().push(status.clone());
    }
}

/// Shared buffer for reporters writing text
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedBuf {
    type Writer = SharedBuf;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

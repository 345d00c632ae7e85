//! In-memory container runtime for unit tests

use super::errors::RuntimeError;
use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, ExecRequest};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A runtime operation recorded by [`FakeRuntime`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Start(ContainerSpec),
    Write(String),
    Exec(Vec<String>),
    Isolate(String),
    Stop(String),
}

pub(crate) struct FakeRuntime {
    image_present: bool,
    fail_start: bool,
    fail_writes: bool,
    fail_install: bool,
    unreachable: bool,
    test_output: ExecOutput,
    calls: Mutex<Vec<Call>>,
    files: Mutex<BTreeMap<String, String>>,
    stopped: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self {
            image_present: true,
            fail_start: false,
            fail_writes: false,
            fail_install: false,
            unreachable: false,
            test_output: ExecOutput {
                exit_code: Some(0),
                ..ExecOutput::default()
            },
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(BTreeMap::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn without_image(mut self) -> Self {
        self.image_present = false;
        self
    }

    pub(crate) fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub(crate) fn failing_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub(crate) fn with_test_output(mut self, output: ExecOutput) -> Self {
        self.test_output = output;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn files(&self) -> BTreeMap<String, String> {
        self.files.lock().unwrap().clone()
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        if self.unreachable {
            return Err(RuntimeError::Unavailable("fake daemon down".to_string()));
        }
        Ok(())
    }

    async fn image_exists(&self, _image: &str) -> Result<bool, RuntimeError> {
        Ok(self.image_present)
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(Call::Start(spec.clone()));
        if self.fail_start {
            return Err(RuntimeError::Request("cannot start".to_string()));
        }
        Ok(format!("fake-{}", spec.name))
    }

    async fn write_file(
        &self,
        _container_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<(), RuntimeError> {
        self.record(Call::Write(path.to_string()));
        if self.fail_writes {
            return Err(RuntimeError::Request("disk full".to_string()));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), String::from_utf8_lossy(content).to_string());
        Ok(())
    }

    async fn exec(
        &self,
        container_id: &str,
        request: &ExecRequest,
    ) -> Result<ExecOutput, RuntimeError> {
        self.record(Call::Exec(request.cmd.clone()));

        if self.stopped.lock().unwrap().iter().any(|id| id == container_id) {
            return Err(RuntimeError::NotFound(container_id.to_string()));
        }

        if request.cmd.iter().any(|arg| arg == "pip") {
            return Ok(if self.fail_install {
                ExecOutput {
                    stderr: "ERROR: No matching distribution found for numpy\n".to_string(),
                    exit_code: Some(1),
                    ..ExecOutput::default()
                }
            } else {
                ExecOutput {
                    exit_code: Some(0),
                    ..ExecOutput::default()
                }
            });
        }

        if self.unreachable {
            return Err(RuntimeError::Unavailable("fake daemon down".to_string()));
        }

        Ok(self.test_output.clone())
    }

    async fn isolate_network(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Isolate(container_id.to_string()));
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Stop(container_id.to_string()));
        self.stopped.lock().unwrap().push(container_id.to_string());
        Ok(())
    }
}

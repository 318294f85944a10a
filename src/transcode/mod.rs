//! # Transcode Module
//!
//! Transcode Supervisor: spawns the external multiplexer (`ffmpeg`) with a
//! [`TranscodeProfile`], wires every source stream to its subprocess
//! descriptor and reports the exit exactly once.
//!
//! ## Guarantees
//!
//! - Each input is pumped by its own task, so a stalled source never starves
//!   another input of the same job.
//! - The child is reaped and every pump/descriptor is released **before** the
//!   final [`JobState`] is published, on every path (natural exit, failure,
//!   [`JobHandle::cancel`]).
//! - `cancel()` is idempotent and a no-op once the job has finished.
//! - A source read error is reported as `SourceStreamFailed` and cancels the
//!   job. A write error towards the subprocess (it closed its input early) is
//!   not a source failure: the exit status decides.
//!
//! Extra input descriptors (`pipe:3`, `pipe:4`, ...) are anonymous pipes
//! whose read ends are `dup2`'d onto the requested numbers right before
//! `exec`, so this module is Unix-only.

pub mod profile;

use parking_lot::Mutex;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::sources::SourceStream;

pub use profile::{OutputPlan, OutputTarget, TranscodeProfile};

/// Tamaño de bloque de cada pump.
const PUMP_CHUNK: usize = 64 * 1024;

/// Los descriptores de origen se duplican por encima de este número antes de
/// colocarlos en su destino, para que ningún `dup2` pise otro origen.
const FD_FLOOR: RawFd = 64;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Estado de salida de un job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    /// Terminado por `cancel()` (sesión reemplazada o detenida).
    Cancelled,
    Failed(MediaError),
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Salida de audio/video de un job con plan [`OutputPlan::Pipe`].
///
/// Llega a EOF cuando el subproceso termina, incluido el caso de `cancel()`.
pub type TranscodeOutput = ChildStdout;

/// Supervisor de subprocesos de transcodificación.
#[derive(Debug, Clone)]
pub struct TranscodeSupervisor {
    program: PathBuf,
}

impl TranscodeSupervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Arranca un job. `inputs` se asigna en orden a `profile.inputs`.
    pub fn start(
        &self,
        profile: &TranscodeProfile,
        inputs: Vec<SourceStream>,
        target: OutputTarget,
    ) -> MediaResult<TranscodeJob> {
        if inputs.len() != profile.inputs.len() {
            return Err(MediaError::Spawn(format!(
                "profile {} expects {} inputs, got {}",
                profile.name,
                profile.inputs.len(),
                inputs.len()
            )));
        }
        if !profile.accepts(&target) {
            return Err(MediaError::Spawn(format!(
                "profile {} cannot write to {:?}",
                profile.name, target
            )));
        }

        let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
        let mut cmd = Command::new(&self.program);
        cmd.args(profile.command_line(&target))
            .stdin(if profile.reads_stdin() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // Pipes extra: el extremo de lectura se hereda en el descriptor pedido
        let mut readers = Vec::new();
        let mut writers = Vec::new();
        for &fd in profile.inputs.iter().filter(|&&fd| fd != 0) {
            let (reader, writer) = io::pipe().map_err(|e| MediaError::Spawn(e.to_string()))?;
            readers.push((reader, fd));
            writers.push((fd, writer));
        }
        if !readers.is_empty() {
            let bindings: Vec<(RawFd, RawFd)> =
                readers.iter().map(|(r, fd)| (r.as_raw_fd(), *fd)).collect();
            let mut scratch = vec![-1; bindings.len()];
            // SAFETY: el hook sólo llama a fcntl/dup2, que son async-signal-safe,
            // y no reserva memoria (scratch ya tiene su tamaño final).
            unsafe {
                cmd.pre_exec(move || bind_descriptors(&bindings, &mut scratch));
            }
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!("❌ No se pudo iniciar {}: {}", self.program.display(), e);
            MediaError::Spawn(format!("{}: {e}", self.program.display()))
        })?;
        // Cerrar nuestras copias de los extremos de lectura
        drop(readers);

        let mut sinks: Vec<(RawFd, Box<dyn AsyncWrite + Send + Unpin>)> = Vec::new();
        if let Some(stdin) = child.stdin.take() {
            sinks.push((0, Box::new(stdin)));
        }
        for (fd, writer) in writers {
            let sender = pipe::Sender::from_owned_fd(OwnedFd::from(writer))?;
            sinks.push((fd, Box::new(sender)));
        }

        let cancel = CancellationToken::new();
        let failure = SourceFailure::default();
        let mut tasks = JoinSet::new();

        for (source, fd) in inputs.into_iter().zip(profile.inputs.iter().copied()) {
            let sink_index = sinks
                .iter()
                .position(|(target, _)| *target == fd)
                .ok_or_else(|| MediaError::Spawn(format!("no descriptor bound for fd {fd}")))?;
            let (_, sink) = sinks.swap_remove(sink_index);
            tasks.spawn(pump(id, fd, source, sink, failure.clone(), cancel.clone()));
        }

        let output = match profile.output {
            OutputPlan::Pipe => child.stdout.take(),
            OutputPlan::File { .. } => {
                if let Some(stdout) = child.stdout.take() {
                    tasks.spawn(drain_progress(id, stdout));
                }
                None
            }
        };

        info!(
            "🎬 Job {} ({}) iniciado con {} entrada(s)",
            id,
            profile.name,
            profile.inputs.len()
        );

        let (state_tx, state_rx) = watch::channel(JobState::Running);
        tokio::spawn(supervise(id, child, tasks, failure, cancel.clone(), state_tx));

        Ok(TranscodeJob {
            handle: JobHandle {
                id,
                cancel,
                state: state_rx,
            },
            output,
        })
    }
}

/// Un job en curso. La salida (si la hay) se presta al llamador con
/// [`TranscodeJob::take_output`]; la vida del subproceso es del supervisor.
pub struct TranscodeJob {
    handle: JobHandle,
    output: Option<TranscodeOutput>,
}

impl TranscodeJob {
    pub fn take_output(&mut self) -> Option<TranscodeOutput> {
        self.output.take()
    }

    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub async fn wait(&self) -> JobState {
        self.handle.wait().await
    }
}

/// Referencia clonable a un job: cancelar y observar su estado.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: u64,
    cancel: CancellationToken,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Solicita la terminación. Idempotente; no hace nada si ya terminó.
    pub fn cancel(&self) {
        if self.state.borrow().is_running() {
            self.cancel.cancel();
        }
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Espera el estado final. Se resuelve una sola vez por job.
    pub async fn wait(&self) -> JobState {
        let mut rx = self.state.clone();
        let settled = rx.wait_for(|s| !s.is_running()).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| {
            JobState::Failed(MediaError::TranscodeFailed("supervisor stopped".to_string()))
        })
    }
}

/// Primer error de lectura de cualquier fuente del job.
#[derive(Debug, Clone, Default)]
struct SourceFailure(Arc<Mutex<Option<String>>>);

impl SourceFailure {
    fn record(&self, reason: String) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

async fn pump(
    job: u64,
    fd: RawFd,
    mut source: SourceStream,
    mut sink: Box<dyn AsyncWrite + Send + Unpin>,
    failure: SourceFailure,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; PUMP_CHUNK];
    let mut total: u64 = 0;
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            read = source.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("❌ Job {}: fuente en fd {} falló tras {} bytes: {}", job, fd, total, e);
                    failure.record(format!("fd {fd}: {e}"));
                    cancel.cancel();
                    return;
                }
            }
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => return,
            w = sink.write_all(&buf[..n]) => w,
        };
        if let Err(e) = written {
            // El subproceso cerró su entrada; decide su código de salida
            debug!("Job {}: fd {} cerrado por el subproceso: {}", job, fd, e);
            return;
        }
        total += n as u64;
    }
    if let Err(e) = sink.shutdown().await {
        debug!("Job {}: cierre de fd {}: {}", job, fd, e);
    }
    debug!("Job {}: fd {} drenado ({} bytes)", job, fd, total);
}

/// Consume `-progress pipe:1` para que el subproceso nunca se bloquee.
async fn drain_progress(job: u64, stdout: ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.starts_with("out_time=") || line.starts_with("progress=") {
            debug!("Job {} {}", job, line);
        }
    }
}

async fn supervise(
    id: u64,
    mut child: Child,
    mut tasks: JoinSet<()>,
    failure: SourceFailure,
    cancel: CancellationToken,
    state_tx: watch::Sender<JobState>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let outcome = match exited {
        Some(Ok(status)) => match failure.get() {
            // La fuente falló justo antes de que el proceso viera EOF
            Some(reason) => JobState::Failed(MediaError::SourceStreamFailed(reason)),
            None => exit_outcome(status),
        },
        Some(Err(e)) => {
            error!("❌ Job {}: error esperando el subproceso: {}", id, e);
            terminate(&mut child).await;
            JobState::Failed(MediaError::TranscodeFailed(e.to_string()))
        }
        None => {
            terminate(&mut child).await;
            match failure.get() {
                Some(reason) => JobState::Failed(MediaError::SourceStreamFailed(reason)),
                None => JobState::Cancelled,
            }
        }
    };

    // Liberar pumps y descriptores antes de publicar el resultado
    cancel.cancel();
    tasks.shutdown().await;
    drop(child);

    match &outcome {
        JobState::Succeeded => info!("✅ Job {} terminado", id),
        JobState::Cancelled => info!("⏹️ Job {} cancelado", id),
        JobState::Failed(e) => warn!("❌ Job {} falló: {}", id, e),
        JobState::Running => {}
    }
    state_tx.send_replace(outcome);
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("start_kill: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("No se pudo recolectar el subproceso: {}", e);
    }
}

fn exit_outcome(status: ExitStatus) -> JobState {
    if status.success() {
        JobState::Succeeded
    } else if let Some(code) = status.code() {
        JobState::Failed(MediaError::TranscodeFailed(format!("exit code {code}")))
    } else if let Some(signal) = status.signal() {
        JobState::Failed(MediaError::TranscodeFailed(format!("terminated by signal {signal}")))
    } else {
        JobState::Failed(MediaError::TranscodeFailed(format!("{status}")))
    }
}

fn bind_descriptors(bindings: &[(RawFd, RawFd)], scratch: &mut [RawFd]) -> io::Result<()> {
    for (slot, (source, _)) in scratch.iter_mut().zip(bindings) {
        // SAFETY: `source` es un descriptor abierto heredado del padre.
        let fd = unsafe { libc::fcntl(*source, libc::F_DUPFD_CLOEXEC, FD_FLOOR) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        *slot = fd;
    }
    for (tmp, (_, target)) in scratch.iter().zip(bindings) {
        // dup2 deja el destino sin FD_CLOEXEC, así sobrevive al exec
        // SAFETY: `tmp` se acaba de abrir arriba.
        if unsafe { libc::dup2(*tmp, *target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

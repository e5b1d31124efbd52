//! Subprocess supervision with resource ceilings.
//!
//! Runs an external command with stdin fed from memory, polls
//! `/proc/<pid>` every 100ms for resident memory and CPU time, and
//! terminates the child as soon as any ceiling is crossed. OS-level
//! backstops (`nice`, `prlimit`) are prepended to the argv when those
//! binaries are on PATH, so a breach is caught even between polls.

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{GwError, GwResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const TERM_GRACE: Duration = Duration::from_millis(500);
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Clock ticks per second assumed for `/proc/<pid>/stat` CPU fields.
const CLK_TCK: u64 = 100;

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Ceilings enforced on a supervised child process.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_seconds: u64,
    pub timeout: Duration,
}

/// Peak usage observed while the child ran.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ResourceStats {
    pub peak_memory_mb: u64,
    pub cpu_seconds: u64,
    pub wall_ms: u64,
}

#[derive(Debug)]
pub struct SupervisedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stats: ResourceStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitBreached {
    Memory,
    Cpu,
    WallClock,
}

impl LimitBreached {
    fn describe(self, limits: &ResourceLimits) -> String {
        match self {
            Self::Memory => format!("memory limit exceeded ({} MB)", limits.max_memory_mb),
            Self::Cpu => format!("CPU time limit exceeded ({} s)", limits.max_cpu_seconds),
            Self::WallClock => {
                format!("timeout after {} s", limits.timeout.as_secs())
            }
        }
    }
}

/// Decide whether observed usage crosses any ceiling. Pure, so the policy
/// is testable without spawning processes.
#[must_use]
pub fn limit_breached(
    memory_mb: u64,
    cpu_seconds: u64,
    elapsed: Duration,
    limits: &ResourceLimits,
) -> Option<LimitBreached> {
    if memory_mb > limits.max_memory_mb {
        return Some(LimitBreached::Memory);
    }
    if cpu_seconds > limits.max_cpu_seconds {
        return Some(LimitBreached::Cpu);
    }
    if elapsed >= limits.timeout {
        return Some(LimitBreached::WallClock);
    }
    None
}

/// Build the effective argv, prepending `nice` and `prlimit` backstops when
/// available. Returns `(program, args)`.
#[must_use]
pub(crate) fn launch_argv(
    program: &str,
    args: &[String],
    limits: &ResourceLimits,
    have_nice: bool,
    have_prlimit: bool,
) -> (String, Vec<String>) {
    let mut argv: Vec<String> = Vec::new();
    if have_nice {
        argv.extend(["-n".to_owned(), "10".to_owned()]);
        if have_prlimit {
            argv.push("prlimit".to_owned());
        }
    }
    if have_prlimit {
        argv.push(format!("--as={}", limits.max_memory_mb * 1024 * 1024));
        // One extra second so the poller normally reports the breach first.
        argv.push(format!("--cpu={}", limits.max_cpu_seconds + 1));
        argv.push("--".to_owned());
    }
    argv.push(program.to_owned());
    argv.extend(args.iter().cloned());

    let launcher = if have_nice {
        "nice".to_owned()
    } else if have_prlimit {
        // argv currently starts with the prlimit options.
        return ("prlimit".to_owned(), argv);
    } else {
        let head = argv.remove(0);
        return (head, argv);
    };
    (launcher, argv)
}

/// Run `program` with `stdin_data` on its stdin, under the given ceilings.
pub fn supervise(
    program: &str,
    args: &[String],
    stdin_data: Vec<u8>,
    limits: &ResourceLimits,
) -> GwResult<SupervisedOutput> {
    if !command_exists(program) {
        return Err(GwError::CommandMissing {
            command: program.to_owned(),
        });
    }

    let (launcher, argv) = launch_argv(
        program,
        args,
        limits,
        command_exists("nice"),
        command_exists("prlimit"),
    );
    let rendered = format!("{} {}", launcher, argv.join(" "));
    tracing::debug!(command = %rendered, "supervising subprocess");

    let mut child = Command::new(&launcher)
        .args(&argv)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let started_at = Instant::now();
    let pid = child.id();

    let mut stdin_pipe = child.stdin.take().expect("stdin piped");
    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");

    // Writer thread: the child may exit before consuming all input, so a
    // broken pipe here is expected and ignored.
    thread::spawn(move || {
        let _ = stdin_pipe.write_all(&stdin_data);
        drop(stdin_pipe);
    });

    let (stdout_tx, stdout_rx) = std::sync::mpsc::channel();
    let (stderr_tx, stderr_rx) = std::sync::mpsc::channel();

    thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        let _ = stdout_tx.send(buf);
    });

    thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        let _ = stderr_tx.send(buf);
    });

    let mut stats = ResourceStats::default();

    loop {
        if let Some(status) = child.try_wait()? {
            stats.wall_ms = saturating_ms(started_at.elapsed());
            let stdout = stdout_rx.recv_timeout(PIPE_DRAIN_TIMEOUT).unwrap_or_default();
            let stderr = stderr_rx.recv_timeout(PIPE_DRAIN_TIMEOUT).unwrap_or_default();
            if !status.success() {
                return Err(GwError::from_process_exit(
                    &rendered,
                    status.code().unwrap_or(-1),
                    &String::from_utf8_lossy(&stderr),
                ));
            }
            return Ok(SupervisedOutput {
                stdout,
                stderr,
                stats,
            });
        }

        if let Some(memory_mb) = read_rss_mb(pid) {
            stats.peak_memory_mb = stats.peak_memory_mb.max(memory_mb);
        }
        if let Some(cpu) = read_cpu_seconds(pid) {
            stats.cpu_seconds = stats.cpu_seconds.max(cpu);
        }

        if let Some(breach) = limit_breached(
            stats.peak_memory_mb,
            stats.cpu_seconds,
            started_at.elapsed(),
            limits,
        ) {
            let reason = breach.describe(limits);
            tracing::warn!(pid, %reason, "terminating supervised subprocess");
            terminate(&mut child, pid);
            // Drain readers so their threads exit.
            let _ = stdout_rx.recv_timeout(PIPE_DRAIN_TIMEOUT);
            let _ = stderr_rx.recv_timeout(PIPE_DRAIN_TIMEOUT);
            return Err(GwError::ResourceLimit { breach, reason });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Graceful SIGTERM via the `kill` binary, escalating to SIGKILL after a
/// short grace window.
fn terminate(child: &mut std::process::Child, pid: u32) {
    if command_exists("kill") {
        let _ = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status();
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Resident set size of `pid` in MB, from `/proc/<pid>/status` VmRSS.
fn read_rss_mb(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Cumulative user+system CPU seconds of `pid`, from `/proc/<pid>/stat`.
fn read_cpu_seconds(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The comm field may contain spaces; fields 14/15 are counted from the
    // closing paren.
    let after_comm = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some((utime + stime) / CLK_TCK)
}

fn saturating_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

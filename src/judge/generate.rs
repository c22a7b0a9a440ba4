//! Test data generation
//!
//! The submission names a generator and a reference solution found in the
//! test-data folder, one per line. The generator runs with arguments 1 to 10;
//! every input it produces is fed to the reference solution. The resulting
//! pairs are uploaded as one `data.zip`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{CaseResult, JudgeContext, Strategy};
use crate::core::message::Message;
use crate::core::status::Status;
use crate::core::utils::{pack_zip, signal_name, truncate};
use crate::engine::compiler::Execute;
use crate::engine::executer::{self, RunOutcome};
use crate::engine::sandbox::CopyInFile;
use crate::error::{JudgeError, Result};
use crate::jobs::report::{EndEvent, NextEvent};

const ROUNDS: u32 = 10;
const TIME_MS: u64 = 2000;
const MEMORY_MB: u64 = 256;
const STDERR_MAX: usize = 1024;
const ARCHIVE: &str = "data.zip";

pub struct Generate;

/// Generator and reference solution named by the submission
fn programs(code: &CopyInFile) -> Result<(String, String)> {
    let content = match code {
        CopyInFile::Content { content } => content,
        _ => return Err(JudgeError::system("Unsupported input")),
    };
    let mut lines = content.lines().map(str::trim);
    let (generator, std) = match (lines.next(), lines.next()) {
        (Some(g), Some(s)) => (g, s),
        _ => return Err(JudgeError::system("Invalid input")),
    };
    for name in [generator, std] {
        if name.is_empty() || name.contains('/') || name == ".." {
            return Err(JudgeError::system("Invalid input"));
        }
    }
    Ok((generator.to_string(), std.to_string()))
}

#[derive(Default)]
struct Totals {
    status: Status,
    time: f64,
    memory: f64,
}

struct Round<'a> {
    ctx: &'a JudgeContext,
    totals: Totals,
    files: Vec<(String, Vec<u8>)>,
}

impl Round<'_> {
    /// Run `execute` for round `i`; the stdout artifact id on success
    async fn step(
        &mut self,
        execute: &Execute,
        i: u32,
        stdin: CopyInFile,
        subtask_id: u32,
        file: String,
    ) -> Result<Option<CopyInFile>> {
        let ctx = self.ctx;
        let param = execute
            .param()
            .with_args([i.to_string()])
            .with_stdin(stdin)
            .with_copy_out_cached("stdout")
            .with_limits(TIME_MS, MEMORY_MB);
        let outcome = executer::run(ctx.sandbox.as_ref(), param).await?;
        let status = verdict(&outcome);

        self.totals.status = self.totals.status.worst(status);
        self.totals.time += outcome.time_ms;
        self.totals.memory = self.totals.memory.max(outcome.memory_kb);

        let produced = match (status, outcome.cached("stdout")) {
            (Status::Accepted, Some(CopyInFile::Cached { file_id })) => {
                let content = ctx.sandbox.get_file(&file_id).await?;
                self.files.push((file, content.to_vec()));
                Some(CopyInFile::cached(file_id))
            }
            _ => {
                outcome.release(ctx.sandbox.as_ref()).await;
                None
            }
        };

        ctx.next(NextEvent::case(CaseResult {
            id: i,
            subtask_id,
            status,
            score: 0.0,
            time: outcome.time_ms,
            memory: outcome.memory_kb,
            message: report(&outcome, status),
            evidence: None,
        }));
        Ok(produced)
    }
}

fn verdict(outcome: &RunOutcome) -> Status {
    if outcome.time_ms > TIME_MS as f64 {
        Status::TimeLimitExceeded
    } else if outcome.memory_kb > (MEMORY_MB * 1024) as f64 {
        Status::MemoryLimitExceeded
    } else if outcome.code != 0 {
        Status::RuntimeError
    } else {
        outcome.status
    }
}

fn report(outcome: &RunOutcome, status: Status) -> Message {
    let mut lines = vec![truncate(&outcome.stderr, STDERR_MAX).to_string()];
    if status == Status::RuntimeError && outcome.code != 0 {
        match signal_name(outcome.code).filter(|_| outcome.signalled) {
            Some(name) => lines.push(format!("ExitCode: {} ({})", outcome.code, name)),
            None => lines.push(format!("ExitCode: {}", outcome.code)),
        }
    }
    Message::new(lines.join("\n").trim().to_string())
}

async fn compile_named(ctx: &JudgeContext, folder: &Path, name: &str) -> Result<Arc<Execute>> {
    let path = folder.join(name);
    if !path.is_file() {
        return Err(JudgeError::system_with("Cannot find {0}.", vec![name.to_string()]));
    }
    ctx.compile_aux(&path).await
}

#[async_trait]
impl Strategy for Generate {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn judge(&self, ctx: &JudgeContext) -> Result<()> {
        ctx.next(NextEvent::status(Status::Compiling));
        let (generator, std) = programs(&ctx.code)?;
        let (generator, std) = tokio::try_join!(
            compile_named(ctx, &ctx.folder, &generator),
            compile_named(ctx, &ctx.folder, &std),
        )?;
        ctx.next(NextEvent::progress(Status::Judging, 0.0));

        let mut round = Round {
            ctx,
            totals: Totals::default(),
            files: Vec::new(),
        };
        let mut artifacts = Vec::new();
        for i in 1..=ROUNDS {
            let input = round
                .step(&generator, i, CopyInFile::empty(), 1, format!("{}.in", i))
                .await?;
            if let Some(input) = input {
                let output = round
                    .step(&std, i, input.clone(), 2, format!("{}.out", i))
                    .await?;
                artifacts.extend(output);
                artifacts.push(input);
            }
        }
        for artifact in artifacts {
            if let CopyInFile::Cached { file_id } = artifact {
                if let Err(e) = ctx.sandbox.delete_file(&file_id).await {
                    warn!("Failed to delete generated file {}: {}", file_id, e);
                }
            }
        }

        let Round { totals, files, .. } = round;
        let archive = pack_zip(files.iter().map(|(name, data)| (name.as_str(), data.as_slice())))?;
        ctx.events.upload(ARCHIVE, archive).await?;
        info!("Generated {} files for {}", files.len(), ctx.rid);

        let score = if totals.status == Status::Accepted { 100.0 } else { 0.0 };
        ctx.end(EndEvent::new(totals.status, score).with_usage(totals.time, totals.memory));
        Ok(())
    }
}

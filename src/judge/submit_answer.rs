//! Output-only problems
//!
//! The submission is the output itself: either one text checked against every
//! case, or a zip archive holding one file per case.

use std::io::{Cursor, Read};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use zip::ZipArchive;

use super::{verify, CaseResult, CaseRunner, JudgeContext, Strategy};
use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::compiler::Execute;
use crate::engine::sandbox::CopyInFile;
use crate::error::Result;
use crate::jobs::testdata::{Case, ProblemKind, SubmitMode, Subtask};

pub struct SubmitAnswer;

struct SubmitAnswerRunner {
    checker: Option<Arc<Execute>>,
    mode: SubmitMode,
}

fn filename_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_#.-]+$").expect("valid filename pattern"))
}

/// Name of the archive entry holding the answer to `case`
async fn entry_name(filename: Option<&str>, case: &Case) -> Result<String> {
    if let Some(name) = filename.filter(|n| filename_pattern().is_match(n)) {
        return Ok(name.replacen('#', &case.id.to_string(), 1));
    }
    let input = tokio::fs::read_to_string(&case.input).await?;
    Ok(input
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect())
}

async fn read_bytes(code: &CopyInFile) -> Result<Vec<u8>> {
    Ok(match code {
        CopyInFile::Src { src } => tokio::fs::read(src).await?,
        CopyInFile::Content { content } => content.clone().into_bytes(),
        _ => Vec::new(),
    })
}

/// Pull one entry out of the submitted archive
fn unzip(archive: Vec<u8>, name: &str) -> std::result::Result<String, &'static str> {
    let mut archive = ZipArchive::new(Cursor::new(archive)).map_err(|_| "Unzip failed.")?;
    let mut file = archive.by_name(name).map_err(|_| "File not found.")?;
    let mut content = String::new();
    file.read_to_string(&mut content).map_err(|_| "Unzip failed.")?;
    Ok(content)
}

#[async_trait]
impl CaseRunner for SubmitAnswerRunner {
    async fn judge_case(
        &self,
        ctx: &JudgeContext,
        subtask: &Subtask,
        case: &Case,
    ) -> Result<CaseResult> {
        let output = match self.mode {
            SubmitMode::Single => ctx.code.clone(),
            SubmitMode::Multi => {
                let name = entry_name(ctx.config.filename.as_deref(), case).await?;
                debug!("Case {} of {} reads {} from the archive", case.id, ctx.rid, name);
                match unzip(read_bytes(&ctx.code).await?, &name) {
                    Ok(content) => CopyInFile::content(content),
                    Err(message) => {
                        return Ok(CaseResult::new(case, subtask, Status::WrongAnswer)
                            .with_message(Message::new(message)))
                    }
                }
            }
        };

        let config = ctx.check_config(self.checker.clone(), case, output, case.score);
        let (check, evidence) = verify(ctx, &config).await?;
        let mut result = CaseResult::new(case, subtask, check.status).with_check(check);
        result.evidence = evidence;
        Ok(result)
    }
}

#[async_trait]
impl Strategy for SubmitAnswer {
    fn name(&self) -> &'static str {
        "submit_answer"
    }

    async fn prepare(&self, ctx: &JudgeContext) -> Result<Arc<dyn CaseRunner>> {
        let mode = match &ctx.config.kind {
            ProblemKind::SubmitAnswer { mode } => mode.clone(),
            _ => SubmitMode::Single,
        };
        let checker = ctx.compile_checker().await?;
        Ok(Arc::new(SubmitAnswerRunner { checker, mode }))
    }
}

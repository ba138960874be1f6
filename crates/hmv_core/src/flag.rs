use anyhow::{Result, bail};
use serde::Serialize;
use tracing::debug;

use crate::client::HmvClient;

const CHECK_FLAG_PATH: &str = "/machines/checkflag.php";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum FlagVerdict {
    Correct,
    Wrong,
    /// The endpoint answers with a full HTML page when the VM name is unknown.
    MachineNotFound,
    Unknown(String),
}

pub fn classify_flag_response(body: &str) -> FlagVerdict {
    let lowered = body.to_lowercase();
    // "incorrect" contains "correct"
    if lowered.contains("incorrect") || lowered.contains("wrong") {
        FlagVerdict::Wrong
    } else if lowered.contains("correct") {
        FlagVerdict::Correct
    } else if ["<link", "stylesheet", "<html"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        FlagVerdict::MachineNotFound
    } else {
        FlagVerdict::Unknown(body.trim().to_string())
    }
}

pub async fn submit_flag(client: &HmvClient, vm: &str, flag: &str) -> Result<FlagVerdict> {
    let vm = vm.trim();
    let flag = flag.trim();
    if vm.is_empty() {
        bail!("a VM name is required to submit a flag");
    }
    if flag.is_empty() {
        bail!("flag cannot be empty");
    }
    let body = client
        .post_form(CHECK_FLAG_PATH, &[("vm", vm), ("flag", flag)])
        .await?;
    let verdict = classify_flag_response(&body);
    debug!(vm, ?verdict, "flag submitted");
    Ok(verdict)
}

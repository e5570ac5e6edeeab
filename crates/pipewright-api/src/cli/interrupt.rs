//! `pwr interrupt`: register an interrupt against a running `pwr serve`.

use anyhow::{Context, Result, anyhow, bail};
use console::style;
use uuid::Uuid;

use pipewright_types::interrupt::{Interrupt, InterruptType, IssuedBy};

use crate::http::handlers::interrupt::RegisterInterruptRequest;
use crate::http::response::ApiResponse;

/// POST the interrupt and print the stored record.
///
/// # Examples
///
/// ```bash
/// pwr interrupt pause 0190b7c4-...
/// pwr interrupt mark-success 0190b7c4-... --node 0190b7c5-...
/// ```
pub async fn send_interrupt(
    server: &str,
    interrupt_type: &str,
    plan_execution_id: Uuid,
    node_execution_id: Option<Uuid>,
    user: &str,
    json: bool,
) -> Result<()> {
    let interrupt_type: InterruptType = interrupt_type.parse().map_err(|e: String| anyhow!(e))?;
    let request = RegisterInterruptRequest {
        interrupt_type,
        plan_execution_id,
        node_execution_id,
        issued_by: Some(IssuedBy::Manual {
            user: user.to_string(),
        }),
    };

    let url = format!("{}/api/v1/interrupts", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;
    let body: ApiResponse<Interrupt> = response
        .json()
        .await
        .context("Server returned an unreadable response")?;

    if let Some(error) = body.errors.first() {
        if json {
            println!("{}", serde_json::to_string_pretty(&body.errors)?);
        }
        bail!("{}: {}", error.code, error.message);
    }
    let interrupt = body
        .data
        .ok_or_else(|| anyhow!("Server response carried no interrupt"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&interrupt)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} interrupt {} ({})",
        style("✓").green().bold(),
        style(interrupt.interrupt_type).cyan(),
        style(interrupt.id).dim(),
        interrupt.state.as_str()
    );
    println!();
    Ok(())
}

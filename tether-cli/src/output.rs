//! Terminal rendering shared by the command handlers

use colored::*;
use tether_core::domain::event::{EventLevel, StoredEvent};
use tether_core::domain::job::{Job, JobStatus};
use tether_core::dto::status::RunStatusView;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Colorize job status for display
pub fn colorize_status(status: JobStatus) -> ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Queued => status_str.yellow(),
        JobStatus::Leased => status_str.cyan(),
        JobStatus::Succeeded => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Canceled => status_str.dimmed(),
        JobStatus::TimedOut => status_str.red(),
    }
}

pub fn print_run_status(view: &RunStatusView) {
    println!("{}", "Run Status:".bold());
    println!("  Run ID:    {}", view.run_id.to_string().cyan());
    println!("  Job ID:    {}", view.job_id.to_string().dimmed());
    println!("  Status:    {}", colorize_status(view.status));
    println!("  Attempt:   {}", view.attempt);
    if let Some(completed) = view.completed_at {
        println!("  Completed: {}", completed.format(TIME_FORMAT));
    }
    if let Some(error) = &view.error_message {
        println!("  Error:     {}", error.red());
    }
}

/// Print detailed job information
pub fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Run ID:      {}", job.run_id.to_string().dimmed());
    println!("  Project:     {}", job.project_id);
    println!("  Kind:        {}", job.kind);
    println!("  Title:       {}", job.title);
    println!("  Status:      {}", colorize_status(job.status));
    println!("  Attempt:     {}", job.attempt);
    println!("  Created:     {}", job.created_at.format(TIME_FORMAT));

    if let Some(target) = &job.target_runner_id {
        println!("  Target:      {}", target);
    }
    if let Some(sealed) = &job.sealed_input {
        println!(
            "  Sealed for:  {} ({})",
            sealed.sealed_input_key_id.dimmed(),
            sealed.sealed_input_alg
        );
    } else if job.awaiting_sealed_input {
        println!("  Sealed for:  {}", "awaiting sealed input".yellow());
    }
    if let Some(lease) = &job.lease {
        println!(
            "  Lease:       {} until {}",
            lease.owner,
            lease.expires_at.format(TIME_FORMAT)
        );
    }
    if job.cancel_requested {
        println!("  Cancel:      {}", "requested".yellow());
    }

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format(TIME_FORMAT));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed:   {}", completed.format(TIME_FORMAT));

        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if !job.args.is_empty() {
        println!("\n{}", "Command:".bold());
        println!("  {}", job.args.join(" "));
    }

    if let Some(result) = &job.result {
        println!("\n{}", "Result:".bold());
        println!(
            "  Success:    {}",
            if result.success {
                "✓".green()
            } else {
                "✗".red()
            }
        );
        println!("  Exit Code:  {}", result.exit_code);

        if let Some(output) = &result.output {
            println!("\n{}", "Output:".bold());
            print_json(output);
        }

        if let Some(error) = &result.error_message {
            println!("\n{}", "Error:".bold());
            println!("{}", error.red());
        }
    }
}

/// Print a stored event
pub fn print_event(stored: &StoredEvent) {
    let event = &stored.event;
    let level_str = event.level.as_str().to_uppercase();
    let level_colored = match event.level {
        EventLevel::Debug => level_str.dimmed(),
        EventLevel::Info => level_str.cyan(),
        EventLevel::Warning => level_str.yellow(),
        EventLevel::Error => level_str.red(),
    };

    println!(
        "{} {} [{}] {}",
        format!("{:>5}", stored.seq).dimmed(),
        event.ts.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        event.message
    );
    if let Some(data) = &event.data {
        println!("      {}", data.to_string().dimmed());
    }
}

pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", value),
    }
}

//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::addrs::ResourceInstanceAddr;
use crate::diagnostics::{Diagnostics, Severity};
use crate::operation::ApplyReport;
use crate::plans::{Action, ChangeReport, Plan};
use crate::state::{ObjectStatus, ResourceInstanceState, State};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Planned change row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// State instance row for table display.
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Deposed")]
    deposed: usize,
    #[tabled(rename = "Provider")]
    provider: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when writing JSON.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => ChangeReport::from_plan(plan).to_json().unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes. Infrastructure matches the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\n📋 Plan ({} mode)\n\n", plan.mode);

        let rows: Vec<ChangeRow> = plan
            .changes
            .resources
            .iter()
            .filter(|c| c.action != Action::NoOp)
            .map(|c| ChangeRow {
                action: Self::format_action(c.action),
                resource: c.deposed_key.as_ref().map_or_else(
                    || c.addr.to_string(),
                    |key| format!("{} (deposed {key})", c.addr),
                ),
                provider: c.provider.to_string(),
                reason: Self::replace_reason(&c.requires_replace),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let outputs: Vec<_> = plan
            .changes
            .outputs
            .iter()
            .filter(|o| o.action != Action::NoOp)
            .collect();
        if !outputs.is_empty() {
            output.push_str("\nOutputs:\n");
            for change in outputs {
                let value = if change.sensitive {
                    String::from("(sensitive)")
                } else {
                    change
                        .after
                        .as_ref()
                        .map_or_else(|| String::from("(known after apply)"), ToString::to_string)
                };
                let _ = writeln!(
                    output,
                    "   {} {} = {value}",
                    Self::format_action(change.action),
                    change.addr
                );
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to add, {} to change, {} to destroy.\n",
            summary.add.to_string().green(),
            summary.change.to_string().yellow(),
            summary.destroy.to_string().red()
        );
        output
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "status": report.status.map(|s| s.to_string()),
                "success": report.is_success(),
                "serial": report.file.serial,
                "errors": report.diagnostics.errors().map(ToString::to_string).collect::<Vec<_>>(),
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let headline = if report.is_success() {
                    format!("{} Apply complete", "✓".green())
                } else {
                    let status = report
                        .status
                        .map_or_else(|| String::from("not started"), |s| s.to_string());
                    format!("{} Apply {status}", "✗".red())
                };
                let mut output = format!("{headline}\n");
                let _ = writeln!(
                    output,
                    "   State serial {} ({} resource instances)",
                    report.file.serial,
                    report.file.state.instances().len()
                );
                output
            }
        }
    }

    /// Formats diagnostics, errors first.
    #[must_use]
    pub fn format_diagnostics(&self, diagnostics: &Diagnostics) -> String {
        if diagnostics.is_empty() {
            return String::new();
        }
        match self.format {
            OutputFormat::Json => {
                let entries: Vec<_> = diagnostics
                    .errors()
                    .chain(diagnostics.warnings())
                    .map(|d| {
                        json!({
                            "severity": d.severity(),
                            "summary": d.summary(),
                            "detail": d.detail(),
                            "address": d.address(),
                        })
                    })
                    .collect();
                serde_json::to_string_pretty(&entries).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for diagnostic in diagnostics.errors().chain(diagnostics.warnings()) {
                    let label = match diagnostic.severity() {
                        Severity::Error => "Error:".red().bold(),
                        Severity::Warning => "Warning:".yellow().bold(),
                    };
                    let _ = write!(output, "{label} {}", diagnostic.summary());
                    if let Some(address) = diagnostic.address() {
                        let _ = write!(output, " ({address})");
                    }
                    output.push('\n');
                    if let Some(detail) = diagnostic.detail() {
                        let _ = writeln!(output, "   {detail}");
                    }
                }
                output
            }
        }
    }

    /// Formats the instances recorded in state.
    #[must_use]
    pub fn format_state_list(&self, state: &State) -> String {
        let instances = state.instances();
        match self.format {
            OutputFormat::Json => {
                let addresses: Vec<String> = instances.iter().map(|(a, _, _)| a.to_string()).collect();
                serde_json::to_string_pretty(&addresses).unwrap_or_default()
            }
            OutputFormat::Text => {
                if instances.is_empty() {
                    return String::from("No resources in state.\n");
                }
                let rows: Vec<InstanceRow> = instances
                    .iter()
                    .map(|(addr, instance, provider)| InstanceRow {
                        resource: addr.to_string(),
                        status: instance
                            .current
                            .as_ref()
                            .map_or_else(|| "none".dimmed().to_string(), |o| Self::format_status(o.status)),
                        deposed: instance.deposed.len(),
                        provider: provider.to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats one resource instance.
    #[must_use]
    pub fn format_instance(&self, addr: &ResourceInstanceAddr, instance: &ResourceInstanceState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(instance).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("# {addr}\n");
                if let Some(current) = &instance.current {
                    let _ = writeln!(output, "status: {}", Self::format_status(current.status));
                    if let Some(attributes) = current.attributes.as_object() {
                        for (name, value) in attributes {
                            let _ = writeln!(output, "   {name} = {value}");
                        }
                    }
                    if !current.dependencies.is_empty() {
                        let deps: Vec<String> = current.dependencies.iter().map(ToString::to_string).collect();
                        let _ = writeln!(output, "depends on: {}", deps.join(", "));
                    }
                }
                for key in instance.deposed.keys() {
                    let _ = writeln!(output, "{} deposed object {key}", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        let text = format!("{} {action}", action.symbol());
        match action {
            Action::Create => text.green().to_string(),
            Action::Update => text.yellow().to_string(),
            Action::Delete => text.red().to_string(),
            Action::DeleteThenCreate | Action::CreateThenDelete => text.magenta().to_string(),
            Action::Read => text.cyan().to_string(),
            Action::NoOp => text.dimmed().to_string(),
        }
    }

    /// Formats an object status with color.
    fn format_status(status: ObjectStatus) -> String {
        match status {
            ObjectStatus::Ready => "ready".green().to_string(),
            ObjectStatus::Tainted => "tainted".yellow().to_string(),
            ObjectStatus::Deposed => "deposed".red().to_string(),
        }
    }

    fn replace_reason(paths: &[Vec<String>]) -> String {
        if paths.is_empty() {
            return String::new();
        }
        let names: Vec<String> = paths.iter().map(|p| p.join(".")).collect();
        format!("forces replacement: {}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ProviderConfigAddr;
    use crate::diagnostics::Diagnostic;
    use crate::plans::{Changes, PlanMode, ResourceInstanceChange};
    use crate::state::ResourceInstanceObject;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn plan(changes: Changes) -> Plan {
        Plan {
            mode: PlanMode::Normal,
            variable_values: BTreeMap::new(),
            changes,
            targets: Vec::new(),
            excludes: Vec::new(),
            prior_state: State::new(),
            config_hash: String::from("abc"),
            state_origin: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_plan_text() {
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(Changes::new()));
        assert!(output.contains("No changes"));
    }

    #[test]
    fn test_plan_text_lists_changes() {
        let mut changes = Changes::new();
        changes.put_resource_change(ResourceInstanceChange {
            action: Action::DeleteThenCreate,
            requires_replace: vec![vec![String::from("zone")]],
            ..ResourceInstanceChange::noop(
                "simple_thing.a".parse().expect("addr"),
                None,
                ProviderConfigAddr::root("simple"),
            )
        });
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(changes));
        assert!(output.contains("simple_thing.a"));
        assert!(output.contains("forces replacement: zone"));
        assert!(output.contains("to destroy"));
    }

    #[test]
    fn test_plan_json_is_change_report() {
        let output = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(Changes::new()));
        let value: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert!(value.get("format_version").is_some());
    }

    #[test]
    fn test_diagnostics_errors_first() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("careful", None));
        diags.push(Diagnostic::error(crate::error::OrchestratorError::internal("broken")).with_address("simple_thing.a"));
        let output = OutputFormatter::new(OutputFormat::Text).format_diagnostics(&diags);
        let error_at = output.find("broken").expect("error shown");
        let warning_at = output.find("careful").expect("warning shown");
        assert!(error_at < warning_at);
        assert!(output.contains("(simple_thing.a)"));
    }

    #[test]
    fn test_state_list_json() {
        let mut state = State::new();
        state.set_current(
            &"simple_thing.a".parse().expect("addr"),
            Some(ResourceInstanceObject::new(json!({"id": "1"}))),
            &ProviderConfigAddr::root("simple"),
        );
        let output = OutputFormatter::new(OutputFormat::Json).format_state_list(&state);
        assert_eq!(output, "[\n  \"simple_thing.a\"\n]");
    }
}

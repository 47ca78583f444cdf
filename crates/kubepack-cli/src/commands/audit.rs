//! Audit command - check permissions before an install

use kubepack_core::Order;
use kubepack_kube::PermissionAuditor;

use crate::commands::connect;
use crate::config::Settings;
use crate::display::{OutputFormat, emit, print_audit_report};
use crate::error::{CliError, Result};

pub async fn run(settings: &Settings, order: &Order, verb: &str, json: bool) -> Result<()> {
    let (gateway, _) = connect(settings).await?;
    let auditor = PermissionAuditor::new(settings.registry()?, gateway);
    let report = auditor.audit(order, verb).await?;

    if json {
        emit(&report, OutputFormat::Json)?;
    } else {
        print_audit_report(&report);
    }

    if report.allowed {
        Ok(())
    } else {
        Err(CliError::Denied {
            denied: report.denied().count(),
        })
    }
}

//! Install command - realize an order on the cluster

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use kubepack_core::Order;
use kubepack_kube::{RealizeOptions, Realizer};

use crate::commands::connect;
use crate::config::Settings;
use crate::display::print_install_report;
use crate::error::Result;

pub async fn run(
    settings: &Settings,
    order: &Order,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<()> {
    println!(
        "{} Installing order {} ({} chart(s))",
        style("→").blue().bold(),
        style(order.uid()).cyan(),
        order.selections().len()
    );

    let (gateway, storage) = connect(settings).await?;
    let options = RealizeOptions {
        release_timeout: timeout.unwrap_or(settings.release_timeout),
        ..Default::default()
    };
    let mut realizer = Realizer::new(settings.registry()?, gateway, storage).with_options(options);
    if let Some(publisher) = settings.publisher()? {
        realizer = realizer.with_publisher(publisher);
    }

    let spinner = spinner(format!(
        "waiting for {}",
        order
            .selections()
            .iter()
            .map(|s| s.release_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    let result = realizer.install(order, cancel).await;
    spinner.finish_and_clear();

    print_install_report(&result?);
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        bar.set_style(template);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

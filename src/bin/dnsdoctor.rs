//! DNS Doctor
//!
//! Runs one diagnosis pass from inside the cluster, writes the JSON report and
//! echoes it to stdout.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use dnsdoctor::cloud::aws::AwsCloud;
use dnsdoctor::config::{Cli, DiagConfig};
use dnsdoctor::diagnosis::summary::SummaryBuilder;
use dnsdoctor::diagnosis::{DiagError, DiagnosisSummary, DiagnosticOrchestrator};
use dnsdoctor::dns::probe::HickoryLookup;
use dnsdoctor::dns::resolv_conf::FileResolverConfig;
use dnsdoctor::k8s::client::KubeCluster;
use dnsdoctor::logging::{RunContext, StructuredLogger};
use dnsdoctor::version;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    println!("{}", version::banner());

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    let guard = StructuredLogger::init(&config.logger_config());
    let code = diagnose(&cli, &config).await;

    if code == 0 && config.hold {
        log::info!("Holding after diagnosis, report is at {}", config.report_path.display());
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    drop(guard);
    process::exit(code);
}

async fn diagnose(cli: &Cli, config: &DiagConfig) -> i32 {
    let run = RunContext::new();
    log::info!("Starting diagnosis run {}", run.id);

    let cluster = match KubeCluster::try_default(config.backend_objects()).await {
        Ok(cluster) => cluster,
        Err(e) => {
            // Still leave a report behind saying why nothing ran
            let summary = SummaryBuilder::aborted(run.id, DiagError::discovery("kubernetes client", e));
            return emit(&summary, cli, config);
        }
    };

    let lookup = Arc::new(HickoryLookup::new(config.probe_timeout()));
    let resolver_config = Arc::new(FileResolverConfig::new(config.resolv_conf_path.clone()));

    let mut orchestrator = match DiagnosticOrchestrator::new(config.clone(), Arc::new(cluster), resolver_config, lookup) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            let summary = SummaryBuilder::aborted(run.id, e);
            return match emit(&summary, cli, config) {
                0 => 2,
                code => code,
            };
        }
    };

    if !config.skip_cloud {
        orchestrator = match AwsCloud::new(config.aws_timeout()) {
            Ok(cloud) => orchestrator.with_cloud(Arc::new(cloud)),
            Err(e) => orchestrator.with_cloud_error(e),
        };
    }

    let summary = orchestrator.run(&run).await;
    emit(&summary, cli, config)
}

fn emit(summary: &DiagnosisSummary, cli: &Cli, config: &DiagConfig) -> i32 {
    if let Err(e) = summary.write_report(&config.report_path) {
        log::error!("{}", e);
        return 1;
    }

    match summary.render(cli.output) {
        Ok(report) => {
            println!("{}", report);
            0
        }
        Err(e) => {
            log::error!("{}", e);
            1
        }
    }
}

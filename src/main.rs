use std::env;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::time::Duration;

use env_logger::Target;
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};

use clap::Parser;
use log::{error, info};

use kube_defrag::client::http::HttpClusterClient;
use kube_defrag::client::interface::{CancelToken, ClusterClient};
use kube_defrag::client::kubeconfig;
use kube_defrag::config::{StrategyParameters, DEFAULT_SETTLE_INTERVAL_SECS};
use kube_defrag::core::common::LabelSelector;
use kube_defrag::core::pod_info::PodInfo;
use kube_defrag::core::policy::MigrationPolicy;
use kube_defrag::core::snapshot::{get_system_snapshot, usage_table};
use kube_defrag::policies::balance::balance_pods_for_defragmentation;
use kube_defrag::policies::place::place_workload;

const PLACE_POLICY: &str = "place";
const BALANCE_POLICY: &str = "balance";

#[derive(Parser)]
#[clap(about = "Cluster defragmentation controller")]
struct Args {
    /// Policy to run: place or balance.
    #[clap(long)]
    policy: Option<String>,

    /// Iterations of the balance loop.
    #[clap(long, default_value_t = 1)]
    iterations: i32,

    /// Name of the pending pod to place (place policy).
    #[clap(long)]
    pod: Option<String>,

    /// Namespace of the pending pod.
    #[clap(long, default_value = "default")]
    ns: String,

    /// Path to the kube config file.
    #[clap(long)]
    kubeconfig: Option<PathBuf>,

    /// Label selector restricting the ready-node listing.
    #[clap(long = "nodeSelector")]
    node_selector: Option<String>,

    /// Seconds to wait between a mutation and the next snapshot.
    #[clap(long = "settleInterval", default_value_t = DEFAULT_SETTLE_INTERVAL_SECS)]
    settle_interval: u64,

    /// Rotated log file; stdout/stderr when unset.
    #[clap(long = "logFile")]
    log_file: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let mut env_logger_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        // log level INFO by default
        env_logger_builder.filter_level(log::LevelFilter::Info);
    }
    if let Some(log_file) = &args.log_file {
        env_logger_builder.target(Target::Pipe(Box::new(FileRotate::new(
            log_file.clone(),
            AppendCount::new(50),
            ContentLimit::Bytes(104857600),
            Compression::None,
            #[cfg(unix)]
            None,
        ))));
    }
    env_logger_builder.init();

    let Some(kubeconfig_path) = args.kubeconfig.as_ref() else {
        eprintln!("please input kubeconfig file");
        process::exit(1);
    };

    let policy_name = args.policy.clone().unwrap_or_default();
    if policy_name != PLACE_POLICY && policy_name != BALANCE_POLICY {
        error!("please input valid policy: place or balance");
        process::exit(1);
    }
    if policy_name == PLACE_POLICY && args.pod.is_none() {
        error!("please provide the pending pod name that has to be placed");
        process::exit(1);
    }

    let access = match kubeconfig::load(kubeconfig_path) {
        Ok(access) => access,
        Err(err) => {
            eprintln!("please input kubeconfig file: {}", err);
            process::exit(1);
        }
    };
    let client = match HttpClusterClient::new(&access) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("cannot build cluster client: {}", err);
            process::exit(1);
        }
    };
    let cancel = CancelToken::new();

    let node_selector = match args.node_selector.as_deref() {
        Some(expr) => match LabelSelector::parse(expr) {
            Ok(selector) => Some(selector),
            Err(err) => {
                error!("invalid node selector: {}", err);
                process::exit(1);
            }
        },
        None => None,
    };

    let nodes = match client.list_nodes(&cancel, node_selector.as_ref()) {
        Ok(nodes) => nodes,
        Err(err) => {
            error!("get ready nodes error: {}", err);
            process::exit(1);
        }
    };
    info!("found {} ready nodes", nodes.len());

    let policy = MigrationPolicy::default();
    let settle_interval = Duration::from_secs(args.settle_interval);
    let params = StrategyParameters {
        iterations: Some(args.iterations),
        ..Default::default()
    };

    let mut snapshot = get_system_snapshot(&client, &cancel, &nodes);
    usage_table(&snapshot).printstd();

    match policy_name.as_str() {
        PLACE_POLICY => {
            let pod_name = args.pod.as_deref().unwrap();
            let pod = match client.get_pod(&cancel, &args.ns, pod_name) {
                Ok(pod) => pod,
                Err(err) => {
                    error!("failed to get pod {}/{}: {}", args.ns, pod_name, err);
                    return;
                }
            };
            let pod_info = Rc::new(PodInfo::new(pod));
            if let Err(err) = place_workload(&client, &cancel, &pod_info, &mut snapshot, &policy) {
                error!("place pod across nodes {}/{}: {}", args.ns, pod_name, err);
                return;
            }
            std::thread::sleep(settle_interval);
            let snapshot = get_system_snapshot(&client, &cancel, &nodes);
            usage_table(&snapshot).printstd();
        }
        BALANCE_POLICY => {
            balance_pods_for_defragmentation(
                &client,
                &cancel,
                &params,
                &nodes,
                &policy,
                settle_interval,
            );
            let snapshot = get_system_snapshot(&client, &cancel, &nodes);
            usage_table(&snapshot).printstd();
        }
        _ => unreachable!(),
    }
}

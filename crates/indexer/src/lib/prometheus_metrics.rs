use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::client::reliable::GateStats;

pub mod calls {
    pub const GET_COMMITTEES: &str = "get_committees";
    pub const GET_SYNC_COMMITTEES: &str = "get_sync_committees";
    pub const GET_BLOCK: &str = "get_block";
    pub const GET_ATTESTATION_REWARDS: &str = "get_attestation_rewards";
    pub const GET_BLOCK_REWARDS: &str = "get_block_rewards";
    pub const GET_SYNC_COMMITTEE_REWARDS: &str = "get_sync_committee_rewards";
    pub const GET_VALIDATORS: &str = "get_validators";
    pub const GET_VALIDATORS_BALANCES: &str = "get_validators_balances";
    pub const GET_PROPOSER_DUTIES: &str = "get_proposer_duties";
    pub const GET_EXECUTION_BLOCK: &str = "get_execution_block";
}

pub trait Registar {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()>;
}

pub struct Metrics {
    pub metadata: Metadata,
    pub services: Services,
    pub gates: Gates,
    pub pipeline: Pipeline,
}

pub struct Metadata {
    pub network_chain: GaugeVec,
    pub app_build_info: GaugeVec,
}

#[derive(Clone)]
pub struct ServiceSeries {
    pub calls: IntCounterVec,
    pub retries: IntCounterVec,
    pub upstream_failures: IntCounterVec,
}

pub struct Services {
    pub consensus: ServiceSeries,
    pub execution: ServiceSeries,
}

pub struct GateSeries {
    pub active: IntGauge,
    pub pending: IntGauge,
    pub capacity: IntGauge,
}

pub struct Gates {
    pub consensus_primary: GateSeries,
    pub consensus_secondary: GateSeries,
    pub execution: GateSeries,
}

pub struct Pipeline {
    pub epochs_processed: IntCounter,
    pub slots_processed: IntCounter,
    pub current_epoch: IntGauge,
}

impl Registar for Metrics {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        self.metadata.register_on(registry)?;
        self.services.register_on(registry)?;
        self.gates.register_on(registry)?;
        self.pipeline.register_on(registry)?;
        Ok(())
    }
}

impl Registar for Metadata {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.network_chain.clone()))?;
        registry.register(Box::new(self.app_build_info.clone()))?;
        Ok(())
    }
}

impl Registar for ServiceSeries {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.calls.clone()))?;
        registry.register(Box::new(self.retries.clone()))?;
        registry.register(Box::new(self.upstream_failures.clone()))?;
        Ok(())
    }
}

impl Registar for Services {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        self.consensus.register_on(registry)?;
        self.execution.register_on(registry)?;
        Ok(())
    }
}

impl Registar for GateSeries {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.active.clone()))?;
        registry.register(Box::new(self.pending.clone()))?;
        registry.register(Box::new(self.capacity.clone()))?;
        Ok(())
    }
}

impl Registar for Gates {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        self.consensus_primary.register_on(registry)?;
        self.consensus_secondary.register_on(registry)?;
        self.execution.register_on(registry)?;
        Ok(())
    }
}

impl Registar for Pipeline {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.epochs_processed.clone()))?;
        registry.register(Box::new(self.slots_processed.clone()))?;
        registry.register(Box::new(self.current_epoch.clone()))?;
        Ok(())
    }
}

impl GateSeries {
    pub fn observe(&self, stats: &GateStats) {
        self.active.set(stats.active as i64);
        self.pending.set(stats.pending as i64);
        self.capacity.set(stats.capacity as i64);
    }
}

fn service_series(namespace: &str, component: &str) -> ServiceSeries {
    ServiceSeries {
        calls: IntCounterVec::new(
            Opts::new(format!("{component}_calls_total"), "Upstream calls")
                .namespace(namespace.to_string()),
            &["call"],
        )
        .unwrap(),
        retries: IntCounterVec::new(
            Opts::new(format!("{component}_retries_total"), "Upstream call retries")
                .namespace(namespace.to_string()),
            &["call"],
        )
        .unwrap(),
        upstream_failures: IntCounterVec::new(
            Opts::new(
                format!("{component}_upstream_failures_total"),
                "Calls that exhausted both endpoints",
            )
            .namespace(namespace.to_string()),
            &["call"],
        )
        .unwrap(),
    }
}

fn gate_series(namespace: &str, gate: &str) -> GateSeries {
    GateSeries {
        active: IntGauge::with_opts(
            Opts::new(format!("{gate}_gate_active"), "Requests holding a gate slot")
                .namespace(namespace.to_string()),
        )
        .unwrap(),
        pending: IntGauge::with_opts(
            Opts::new(format!("{gate}_gate_pending"), "Requests waiting for a gate slot")
                .namespace(namespace.to_string()),
        )
        .unwrap(),
        capacity: IntGauge::with_opts(
            Opts::new(format!("{gate}_gate_capacity"), "Gate slot capacity")
                .namespace(namespace.to_string()),
        )
        .unwrap(),
    }
}

impl Metrics {
    pub fn new(namespace: &str) -> Self {
        Self {
            metadata: Metadata {
                network_chain: GaugeVec::new(
                    Opts::new("network_chain", "Chain the indexer follows")
                        .namespace(namespace.to_string()),
                    &["chain_name"],
                )
                .unwrap(),
                app_build_info: GaugeVec::new(
                    Opts::new("app_build_info", "Application build info")
                        .namespace(namespace.to_string()),
                    &["version"],
                )
                .unwrap(),
            },
            services: Services {
                consensus: service_series(namespace, "consensus"),
                execution: service_series(namespace, "execution"),
            },
            gates: Gates {
                consensus_primary: gate_series(namespace, "consensus_primary"),
                consensus_secondary: gate_series(namespace, "consensus_secondary"),
                execution: gate_series(namespace, "execution"),
            },
            pipeline: Pipeline {
                epochs_processed: IntCounter::with_opts(
                    Opts::new("epochs_processed_total", "Epochs fully processed")
                        .namespace(namespace.to_string()),
                )
                .unwrap(),
                slots_processed: IntCounter::with_opts(
                    Opts::new("slots_processed_total", "Slots fully processed")
                        .namespace(namespace.to_string()),
                )
                .unwrap(),
                current_epoch: IntGauge::with_opts(
                    Opts::new("current_epoch", "Epoch currently being processed")
                        .namespace(namespace.to_string()),
                )
                .unwrap(),
            },
        }
    }
}

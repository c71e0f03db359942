use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

use crate::SharedCache;

#[derive(Debug)]
struct Instrumented(SharedCache);

pub fn register(reg: &mut Registry, cache: SharedCache) {
    reg.register_collector(Box::new(Instrumented(cache)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let this = self.0.read();

        let rules = ConstGauge::new(this.rule_count() as u32);
        let rules_encoder = encoder.encode_descriptor(
            "rule_index_size",
            "The number of rules in the cache",
            None,
            MetricType::Gauge,
        )?;
        rules.encode(rules_encoder)?;

        let address_groups = ConstGauge::new(this.address_group_count() as u32);
        let address_groups_encoder = encoder.encode_descriptor(
            "address_group_index_size",
            "The number of address groups in the cache",
            None,
            MetricType::Gauge,
        )?;
        address_groups.encode(address_groups_encoder)?;

        let applied_to_groups = ConstGauge::new(this.applied_to_group_count() as u32);
        let applied_to_groups_encoder = encoder.encode_descriptor(
            "applied_to_group_index_size",
            "The number of applied-to groups in the cache",
            None,
            MetricType::Gauge,
        )?;
        applied_to_groups.encode(applied_to_groups_encoder)?;

        let policies = ConstGauge::new(this.network_policy_count() as u32);
        let policies_encoder = encoder.encode_descriptor(
            "network_policy_index_size",
            "The number of network policies with rules in the cache",
            None,
            MetricType::Gauge,
        )?;
        policies.encode(policies_encoder)?;

        Ok(())
    }
}

//! Resource arithmetic: quantity parsing, the resource vector and per-pod
//! request aggregation with non-zero defaults.

use std::collections::BTreeMap;

use log::error;
use serde::{Deserialize, Serialize};

use crate::core::pod::Pod;

pub const KIB: i64 = 1024;
pub const MIB: i64 = 1024 * KIB;

/// Default request substituted for a container that does not specify cpu,
/// used only for the non-zero totals: 100 millicores.
pub const DEFAULT_MILLI_CPU_REQUEST: i64 = 100;
/// Default request substituted for a container that does not specify memory,
/// used only for the non-zero totals: 200 MiB.
pub const DEFAULT_MEMORY_REQUEST: i64 = 200 * MIB;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";

/// An api quantity string such as `100m`, `2Gi` or `0.5`.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub String);

pub type ResourceList = BTreeMap<String, Quantity>;

impl Quantity {
    pub fn new(value: impl Into<String>) -> Quantity {
        Quantity(value.into())
    }

    /// Parses a cpu quantity into millicores: `100m` -> 100, `2` -> 2000,
    /// `0.5` -> 500.
    pub fn to_milli(&self) -> Result<i64, String> {
        let raw = self.0.trim();
        if let Some(milli) = raw.strip_suffix('m') {
            return milli
                .parse::<i64>()
                .map_err(|e| format!("bad milli quantity {:?}: {}", raw, e));
        }
        let cores = raw
            .parse::<f64>()
            .map_err(|e| format!("bad cpu quantity {:?}: {}", raw, e))?;
        Ok((cores * 1000.0).round() as i64)
    }

    /// Parses a memory or scalar quantity into its base unit (bytes for
    /// memory). Supports decimal (`k`, `M`, ...) and binary (`Ki`, `Mi`, ...)
    /// suffixes as well as plain integers.
    pub fn to_scalar(&self) -> Result<i64, String> {
        let raw = self.0.trim();
        let suffixes: [(&str, i64); 12] = [
            ("Ki", 1 << 10),
            ("Mi", 1 << 20),
            ("Gi", 1 << 30),
            ("Ti", 1 << 40),
            ("Pi", 1 << 50),
            ("Ei", 1 << 60),
            ("k", 1_000),
            ("M", 1_000_000),
            ("G", 1_000_000_000),
            ("T", 1_000_000_000_000),
            ("P", 1_000_000_000_000_000),
            ("E", 1_000_000_000_000_000_000),
        ];
        for (suffix, multiplier) in suffixes.iter() {
            if let Some(digits) = raw.strip_suffix(suffix) {
                let value = digits
                    .parse::<f64>()
                    .map_err(|e| format!("bad quantity {:?}: {}", raw, e))?;
                return Ok((value * *multiplier as f64).round() as i64);
            }
        }
        if let Some(milli) = raw.strip_suffix('m') {
            // Milli scalar, rounded down to whole units.
            let value = milli
                .parse::<i64>()
                .map_err(|e| format!("bad quantity {:?}: {}", raw, e))?;
            return Ok(value / 1000);
        }
        let value = raw
            .parse::<f64>()
            .map_err(|e| format!("bad quantity {:?}: {}", raw, e))?;
        Ok(value.round() as i64)
    }
}

/// Component-wise resource vector: millicores, bytes of memory and opaque
/// named scalar resources. Scalar keys absent from one operand read as zero.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub milli_cpu: i64,
    pub memory: i64,
    pub scalar_resources: BTreeMap<String, i64>,
}

impl Resource {
    /// Builds a resource vector from an api resource list (e.g. a node's
    /// allocatable). Unparseable quantities are logged and read as zero.
    pub fn from_resource_list(list: &ResourceList) -> Resource {
        let mut resource = Resource::default();
        for (name, quantity) in list.iter() {
            match name.as_str() {
                RESOURCE_CPU => resource.milli_cpu = parse_or_zero(quantity, name, true),
                RESOURCE_MEMORY => resource.memory = parse_or_zero(quantity, name, false),
                RESOURCE_PODS => {}
                _ => {
                    resource
                        .scalar_resources
                        .insert(name.clone(), parse_or_zero(quantity, name, false));
                }
            }
        }
        resource
    }

    pub fn add(&mut self, other: &Resource) {
        self.milli_cpu += other.milli_cpu;
        self.memory += other.memory;
        for (name, quantity) in other.scalar_resources.iter() {
            *self.scalar_resources.entry(name.clone()).or_insert(0) += quantity;
        }
    }

    pub fn sub(&mut self, other: &Resource) {
        self.milli_cpu -= other.milli_cpu;
        self.memory -= other.memory;
        for (name, quantity) in other.scalar_resources.iter() {
            *self.scalar_resources.entry(name.clone()).or_insert(0) -= quantity;
        }
    }

    /// Component-wise maximum, used to fold init containers which never run
    /// concurrently with each other or the main containers.
    pub fn set_max(&mut self, other: &Resource) {
        self.milli_cpu = self.milli_cpu.max(other.milli_cpu);
        self.memory = self.memory.max(other.memory);
        for (name, quantity) in other.scalar_resources.iter() {
            let entry = self.scalar_resources.entry(name.clone()).or_insert(0);
            *entry = (*entry).max(*quantity);
        }
    }

    pub fn scalar(&self, name: &str) -> i64 {
        self.scalar_resources.get(name).copied().unwrap_or(0)
    }
}

fn parse_or_zero(quantity: &Quantity, name: &str, is_cpu: bool) -> i64 {
    let parsed = if is_cpu {
        quantity.to_milli()
    } else {
        quantity.to_scalar()
    };
    match parsed {
        Ok(value) => value,
        Err(err) => {
            error!("ignoring unparseable {} quantity: {}", name, err);
            0
        }
    }
}

/// Returns the cpu and memory requests of a single container's resource list
/// with the non-zero defaults substituted for absent entries.
pub fn get_nonzero_requests(requests: &ResourceList) -> (i64, i64) {
    let cpu = match requests.get(RESOURCE_CPU) {
        Some(quantity) => parse_or_zero(quantity, RESOURCE_CPU, true),
        None => DEFAULT_MILLI_CPU_REQUEST,
    };
    let memory = match requests.get(RESOURCE_MEMORY) {
        Some(quantity) => parse_or_zero(quantity, RESOURCE_MEMORY, false),
        None => DEFAULT_MEMORY_REQUEST,
    };
    (cpu, memory)
}

/// Aggregates a pod's requests: sum over runtime containers, component-wise
/// max over init containers. Returns the real request vector together with
/// the non-zero-defaulted cpu and memory totals. Scalar resources carry no
/// non-zero default.
pub fn calculate_resource(pod: &Pod) -> (Resource, i64, i64) {
    let mut resource = Resource::default();
    let mut non0_cpu = 0i64;
    let mut non0_mem = 0i64;

    for container in pod.spec.containers.iter() {
        resource.add(&Resource::from_resource_list(&container.resources.requests));
        let (cpu, memory) = get_nonzero_requests(&container.resources.requests);
        non0_cpu += cpu;
        non0_mem += memory;
    }

    for init_container in pod.spec.init_containers.iter() {
        resource.set_max(&Resource::from_resource_list(
            &init_container.resources.requests,
        ));
        let (cpu, memory) = get_nonzero_requests(&init_container.resources.requests);
        non0_cpu = non0_cpu.max(cpu);
        non0_mem = non0_mem.max(memory);
    }

    (resource, non0_cpu, non0_mem)
}

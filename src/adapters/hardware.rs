//! Host hardware samples (CPU, GPU, RAM).

use serde_json::Value;
use wire::{CpuInfo, Event, EventKind, GpuInfo, HardwarePayload, Message, RamInfo};

use super::{decode_metadata, record_str};
use crate::sync::{Sequenced, SubscriptionKey, SyncSpec};

/// Seconds of history a hardware view spans.
const VIEW_RANGE_SECS: usize = 300;
/// Seconds between samples reported by a run.
const SAMPLE_INTERVAL_SECS: usize = 2;

/// Samples fetched per run: the view range plus 10% headroom.
pub const HARDWARE_WINDOW: usize = (VIEW_RANGE_SECS / SAMPLE_INTERVAL_SECS * 11).div_ceil(10);

#[derive(Clone, Debug, PartialEq)]
pub struct CpuSample {
    /// Core index; missing or negative ids are replaced by the position.
    pub id: i64,
    pub percentage: f64,
    pub frequency: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HardwareSample {
    pub timestamp: Option<String>,
    pub run_id: Option<String>,
    pub cpus: Vec<CpuSample>,
    pub gpus: Vec<GpuInfo>,
    pub ram: Option<RamInfo>,
}

/// Give every CPU a usable id.
#[must_use]
pub fn normalize_cpus(cpus: Vec<CpuInfo>) -> Vec<CpuSample> {
    cpus.into_iter()
        .enumerate()
        .map(|(index, cpu)| CpuSample {
            id: match cpu.id {
                Some(id) if id >= 0 => id,
                _ => i64::try_from(index).unwrap_or(i64::MAX),
            },
            percentage: cpu.percentage,
            frequency: cpu.frequency,
        })
        .collect()
}

impl HardwareSample {
    fn from_payload(timestamp: Option<String>, run_id: Option<String>, payload: HardwarePayload) -> Self {
        Self {
            timestamp,
            run_id,
            cpus: normalize_cpus(payload.cpus),
            gpus: payload.gpus,
            ram: payload.ram,
        }
    }

    #[must_use]
    pub fn from_record(record: &Value) -> Option<Self> {
        let payload: HardwarePayload = decode_metadata(record)?;
        Some(Self::from_payload(
            record_str(record, "timestamp"),
            record_str(record, "runid"),
            payload,
        ))
    }

    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        let Event::Hardware(payload) = &message.event else {
            return None;
        };
        Some(Self::from_payload(
            message.envelope.timestamp.clone(),
            message.envelope.run_id.clone(),
            payload.clone(),
        ))
    }

    /// Mean CPU load across cores, `None` without CPU data.
    #[must_use]
    pub fn cpu_load(&self) -> Option<f64> {
        if self.cpus.is_empty() {
            return None;
        }
        let total: f64 = self.cpus.iter().map(|cpu| cpu.percentage).sum();
        #[allow(clippy::cast_precision_loss)]
        let count = self.cpus.len() as f64;
        Some(total / count)
    }
}

impl Sequenced for HardwareSample {
    fn seq_timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    fn seq_run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }
}

#[must_use]
pub fn hardware_spec(project_id: &str, run_id: &str) -> SyncSpec<HardwareSample> {
    let key = SubscriptionKey::new(project_id, EventKind::Hardware)
        .with_run(run_id)
        .with_limit(HARDWARE_WINDOW);
    SyncSpec::new(key, HardwareSample::from_record, HardwareSample::from_message)
}

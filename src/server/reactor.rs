//! Input-change reactor: the put path from an input write to republished outputs

use crate::error::{SurrogateError, SurrogateResult};
use crate::formatter::{ImageKeys, OutputFormatter, Protocol};
use crate::metrics::ServingMetrics;
use crate::registry::WorkerRegistry;
use crate::server::pvdb::{image_descriptor_pvs, input_pvdb, output_pvdb, PvRecord};
use crate::server::{PvHandle, PvServer};
use crate::store::InputStore;
use crate::types::{Image, ModelMetadata, PvValue, WireEntry, WireOutput};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Deployment-wide publication settings, fixed before the first PV is registered
#[derive(Debug, Clone, PartialEq)]
pub struct ReactorSettings {
    pub prefix: String,
    pub protocol: Protocol,
    pub precision: u32,
    pub color_mode: i64,
}

impl ReactorSettings {
    pub fn pv_name(&self, logical: &str) -> String {
        format!("{}:{}", self.prefix, logical)
    }
}

/// Write state of a single input PV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    Writing,
}

struct InputPv {
    handle: Arc<dyn PvHandle>,
    in_flight: AtomicUsize,
}

impl InputPv {
    fn begin(&self) -> WriteGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        WriteGuard(&self.in_flight)
    }

    fn state(&self) -> WriteState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            WriteState::Writing
        } else {
            WriteState::Idle
        }
    }
}

struct WriteGuard<'a>(&'a AtomicUsize);

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of a completed write
#[derive(Debug, Clone, PartialEq)]
pub struct PutReport {
    pub pv: String,
    pub value: f64,
    /// Output PVs posted
    pub posted: usize,
    pub inference: Duration,
    pub total: Duration,
}

/// Drives the put path: store the write, rerun the models, republish outputs.
pub struct InputReactor {
    settings: ReactorSettings,
    store: InputStore,
    formatter: OutputFormatter,
    registry: Arc<WorkerRegistry>,
    inputs: HashMap<String, InputPv>,
    outputs: HashMap<String, Arc<dyn PvHandle>>,
    metrics: Arc<ServingMetrics>,
}

impl InputReactor {
    /// Seed the input state, run the starting inference and register every PV.
    ///
    /// Any failure here is fatal for the process.
    pub fn start(
        settings: ReactorSettings,
        metadata: &ModelMetadata,
        defaults: HashMap<String, f64>,
        image: Option<Arc<Image>>,
        registry: Arc<WorkerRegistry>,
        server: &dyn PvServer,
        metrics: Arc<ServingMetrics>,
    ) -> SurrogateResult<Self> {
        let store = InputStore::seeded(metadata, defaults, image)?;
        let formatter = OutputFormatter::for_metadata(settings.protocol, metadata);

        let state = store.snapshot();
        let starting = registry.with_runner(|runner| runner.run(&state))??;
        let wire = formatter.format(&starting)?;

        let mut inputs = HashMap::new();
        for record in input_pvdb(metadata, &state.scalars, settings.precision) {
            let logical = record.name.clone();
            let handle = register(server, &settings, record)?;
            inputs.insert(
                logical,
                InputPv {
                    handle,
                    in_flight: AtomicUsize::new(0),
                },
            );
        }

        let mut outputs = HashMap::new();
        for record in output_pvdb(metadata, settings.protocol, &wire, settings.precision) {
            let logical = record.name.clone();
            outputs.insert(logical, register(server, &settings, record)?);
        }

        if settings.protocol == Protocol::Flattened && metadata.kind.has_image_output() {
            let keys = ImageKeys::for_image(&metadata.image_output_name);
            let shape = metadata
                .bins
                .map(|(x, y)| vec![x, y])
                .unwrap_or_default();
            for record in
                image_descriptor_pvs(&keys.image, &shape, settings.color_mode, settings.precision)
            {
                register(server, &settings, record)?;
            }
        }

        info!(
            prefix = %settings.prefix,
            protocol = %settings.protocol,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "PV server started"
        );

        Ok(Self {
            settings,
            store,
            formatter,
            registry,
            inputs,
            outputs,
            metrics,
        })
    }

    pub fn settings(&self) -> &ReactorSettings {
        &self.settings
    }

    pub fn store(&self) -> &InputStore {
        &self.store
    }

    /// Published input PV names
    pub fn input_pvs(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.inputs.keys().map(|n| self.settings.pv_name(n)).collect();
        names.sort();
        names
    }

    pub fn write_state(&self, pv_name: &str) -> Option<WriteState> {
        let name = self.logical_input(pv_name).ok()?;
        self.inputs.get(name).map(InputPv::state)
    }

    fn logical_input<'a>(&self, pv_name: &'a str) -> SurrogateResult<&'a str> {
        pv_name
            .strip_prefix(self.settings.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|name| self.inputs.contains_key(*name))
            .ok_or_else(|| SurrogateError::UnknownPv(pv_name.to_string()))
    }

    /// Handle an external write to an input PV.
    ///
    /// Runs one full inference pass before returning. On failure the input
    /// state keeps the new value while the output PVs keep their last values.
    pub fn put(&self, pv_name: &str, value: f64) -> SurrogateResult<PutReport> {
        let start = Instant::now();
        let input = self
            .logical_input(pv_name)
            .and_then(|name| {
                self.inputs
                    .get(name)
                    .map(|input| (name, input))
                    .ok_or_else(|| SurrogateError::UnknownPv(pv_name.to_string()))
            })
            .inspect_err(|e| {
                self.metrics.record_failure(pv_name);
                warn!(pv = %pv_name, value = value, error = %e, "Write rejected");
            });
        let (name, input) = input?;
        let _writing = input.begin();

        input.handle.post(WireEntry::plain(PvValue::Scalar(value)))?;
        self.store.set(name, value);

        match self.refresh() {
            Ok((posted, inference)) => {
                let total = start.elapsed();
                self.metrics.record_write(pv_name, total, inference, posted);
                debug!(
                    pv = %pv_name,
                    value = value,
                    posted = posted,
                    inference_us = inference.as_micros() as u64,
                    elapsed_us = total.as_micros() as u64,
                    "Input write processed"
                );
                Ok(PutReport {
                    pv: pv_name.to_string(),
                    value,
                    posted,
                    inference,
                    total,
                })
            }
            Err(e) => {
                self.metrics.record_failure(pv_name);
                error!(pv = %pv_name, value = value, error = %e, "Input write failed");
                Err(e)
            }
        }
    }

    fn refresh(&self) -> SurrogateResult<(usize, Duration)> {
        let state = self.store.snapshot();

        let inference_start = Instant::now();
        let output = self.registry.with_runner(|runner| runner.run(&state))??;
        let inference = inference_start.elapsed();

        let wire = self.formatter.format(&output)?;
        let posts = self.resolve(wire)?;
        let posted = posts.len();
        for (handle, entry) in posts {
            handle.post(entry)?;
        }

        Ok((posted, inference))
    }

    // every key must have a registered PV before anything is posted
    fn resolve(&self, wire: WireOutput) -> SurrogateResult<Vec<(&Arc<dyn PvHandle>, WireEntry)>> {
        wire.into_iter()
            .map(|(key, entry)| {
                self.outputs
                    .get(&key)
                    .map(|handle| (handle, entry))
                    .ok_or_else(|| {
                        SurrogateError::Publish(format!(
                            "no PV registered for output {}",
                            self.settings.pv_name(&key)
                        ))
                    })
            })
            .collect()
    }
}

fn register(
    server: &dyn PvServer,
    settings: &ReactorSettings,
    mut record: PvRecord,
) -> SurrogateResult<Arc<dyn PvHandle>> {
    record.name = settings.pv_name(&record.name);
    debug!(pv = %record.name, kind = ?record.descriptor.kind, "Registering PV");
    server.publish(record)
}

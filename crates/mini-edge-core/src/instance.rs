//! WebAssembly instance lifecycle management.
//!
//! [`InstanceRunner`] drives one worker invocation inside a fresh store:
//!
//! 1. Instantiate the module against the linker's host functions
//! 2. Copy the request JSON into guest memory through `alloc`
//! 3. Call `handle` and read back the packed `(ptr << 32) | len` body
//! 4. Classify any trap into an [`ExecutionFault`]

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{Engine, Instance, Linker, Store, Trap};

use crate::module::{CompiledModule, HANDLE_EXPORT};
use crate::request::WorkerResponse;
use crate::store::{WorkerContext, calculate_fuel_consumed, get_remaining_fuel};
use mini_edge_common::{ExecutionFault, RuntimeError};

/// Optional guest export used to reserve memory for host-written data.
pub const ALLOC_EXPORT: &str = "alloc";

/// Guest linear memory export.
pub const MEMORY_EXPORT: &str = "memory";

/// Pack a guest pointer and length into the `i64` used across the ABI.
#[allow(clippy::cast_possible_wrap)]
pub fn pack_ptr_len(ptr: u32, len: u32) -> i64 {
    ((u64::from(ptr) << 32) | u64::from(len)) as i64
}

/// Split a packed `i64` into pointer and length.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn unpack_ptr_len(packed: i64) -> (u32, u32) {
    let raw = packed as u64;
    ((raw >> 32) as u32, raw as u32)
}

/// Instance lifecycle manager.
///
/// Holds the linker with all host functions registered. It is shared by
/// every invocation; each invocation brings its own [`Store`].
pub struct InstanceRunner {
    engine: Arc<Engine>,
    linker: Linker<WorkerContext>,
}

impl InstanceRunner {
    /// Create a new instance runner with an empty linker.
    pub fn new(engine: Arc<Engine>) -> Self {
        let linker = Linker::new(&engine);
        Self { engine, linker }
    }

    /// Get a mutable reference to the linker.
    ///
    /// Use this to register host functions.
    pub fn linker_mut(&mut self) -> &mut Linker<WorkerContext> {
        &mut self.linker
    }

    /// Run a worker's `handle` export with the given request bytes.
    ///
    /// # Errors
    ///
    /// - [`ExecutionFault::MissingHandler`] if `handle` is absent or has the
    ///   wrong signature
    /// - [`ExecutionFault::Runtime`] for instantiation traps, runtime traps,
    ///   fuel exhaustion and malformed responses
    #[instrument(skip_all, fields(request_id = %store.data().request_id, worker = %store.data().worker))]
    pub async fn run_handler(
        &self,
        module: &CompiledModule,
        store: &mut Store<WorkerContext>,
        request: &[u8],
    ) -> Result<WorkerResponse, ExecutionFault> {
        let start = Instant::now();
        let initial_fuel = get_remaining_fuel(store).unwrap_or(0);

        debug!("Instantiating worker module");

        let instance = self
            .linker
            .instantiate_async(&mut *store, module.as_module())
            .await
            .map_err(|e| classify(&e))?;

        let handle = instance
            .get_typed_func::<(i32, i32), i64>(&mut *store, HANDLE_EXPORT)
            .map_err(|_| ExecutionFault::MissingHandler)?;

        let (req_ptr, req_len) = write_request(&instance, store, request).await?;

        debug!(req_len, "Calling handle");
        let result = handle.call_async(&mut *store, (req_ptr, req_len)).await;

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, store);
        store.data_mut().metrics.fuel_consumed = fuel_consumed;
        store.data_mut().finalize_metrics();
        let duration = start.elapsed();

        let packed = match result {
            Ok(packed) => packed,
            Err(e) => {
                let fault = classify(&e);
                warn!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed,
                    error = %fault,
                    "Handler trapped"
                );
                return Err(fault);
            }
        };

        let body = read_body(&instance, store, packed)?;

        info!(
            duration_ms = duration.as_millis(),
            fuel_consumed,
            body_len = body.len(),
            "Handler completed"
        );

        let ctx = store.data();
        Ok(WorkerResponse {
            status: ctx.status,
            headers: ctx.headers.clone(),
            body,
        })
    }

    /// Get the engine reference.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Copy the request into guest memory.
///
/// Workers that export no `alloc` do not read the request and receive
/// `(0, 0)`.
async fn write_request(
    instance: &Instance,
    store: &mut Store<WorkerContext>,
    request: &[u8],
) -> Result<(i32, i32), ExecutionFault> {
    if request.is_empty() {
        return Ok((0, 0));
    }
    let Ok(alloc) = instance.get_typed_func::<i32, i32>(&mut *store, ALLOC_EXPORT) else {
        return Ok((0, 0));
    };
    let Some(memory) = instance.get_memory(&mut *store, MEMORY_EXPORT) else {
        return Ok((0, 0));
    };

    let len = i32::try_from(request.len())
        .map_err(|_| ExecutionFault::runtime("Request too large for guest memory"))?;
    let ptr = alloc
        .call_async(&mut *store, len)
        .await
        .map_err(|e| classify(&e))?;

    let offset = usize::try_from(ptr)
        .map_err(|_| ExecutionFault::runtime("alloc returned a negative pointer"))?;
    memory
        .write(&mut *store, offset, request)
        .map_err(|_| ExecutionFault::runtime("alloc returned an out-of-bounds pointer"))?;

    Ok((ptr, len))
}

/// Read the response body described by a packed pointer/length.
fn read_body(
    instance: &Instance,
    store: &mut Store<WorkerContext>,
    packed: i64,
) -> Result<Vec<u8>, ExecutionFault> {
    let (ptr, len) = unpack_ptr_len(packed);
    if len == 0 {
        return Ok(Vec::new());
    }

    let memory = instance
        .get_memory(&mut *store, MEMORY_EXPORT)
        .ok_or_else(|| ExecutionFault::runtime("Worker returned a body but exports no memory"))?;

    let data = memory.data(&*store);
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| ExecutionFault::runtime("Response body out of bounds"))?;

    Ok(data[start..end].to_vec())
}

/// Classify a Wasmtime error into an execution fault.
pub fn classify(error: &wasmtime::Error) -> ExecutionFault {
    if is_out_of_fuel(error) {
        return RuntimeError::FuelExhausted.into();
    }
    RuntimeError::trap(trap_message(error)).into()
}

/// Human-readable message: the trap description, or the root cause for
/// errors raised outside guest code.
fn trap_message(error: &wasmtime::Error) -> String {
    match error.downcast_ref::<Trap>() {
        Some(trap) => trap.to_string(),
        None => error.root_cause().to_string(),
    }
}

/// Check if an error is due to fuel exhaustion.
fn is_out_of_fuel(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner").finish_non_exhaustive()
    }
}

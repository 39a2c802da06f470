//! Guest memory access for host functions.
//!
//! Reads are bounds-checked slices of the guest's exported `memory`. Data
//! returned to the guest is copied into a buffer the guest provides through
//! its `alloc` export, and handed back as a packed `(ptr << 32) | len`.

use mini_edge_common::HostFunctionError;
use mini_edge_core::WorkerContext;
use mini_edge_core::instance::{ALLOC_EXPORT, MEMORY_EXPORT, pack_ptr_len};
use wasmtime::{Caller, Extern, Memory};

fn guest_memory(caller: &mut Caller<'_, WorkerContext>) -> Result<Memory, HostFunctionError> {
    caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| HostFunctionError::GuestMemory("memory export not found".into()))
}

/// Copy `len` bytes at `ptr` out of guest memory.
pub fn read_bytes(
    caller: &mut Caller<'_, WorkerContext>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, HostFunctionError> {
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        return Err(HostFunctionError::GuestMemory(format!(
            "negative pointer or length ({ptr}, {len})"
        )));
    };
    if len == 0 {
        return Ok(Vec::new());
    }

    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            HostFunctionError::GuestMemory(format!(
                "access out of bounds ({start}..{}, memory size {})",
                start.saturating_add(len),
                data.len()
            ))
        })?;

    Ok(data[start..end].to_vec())
}

/// Read a UTF-8 string out of guest memory.
pub fn read_string(
    caller: &mut Caller<'_, WorkerContext>,
    ptr: i32,
    len: i32,
) -> Result<String, HostFunctionError> {
    let bytes = read_bytes(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| HostFunctionError::GuestMemory("invalid UTF-8".into()))
}

/// Copy `bytes` into a fresh guest allocation and return the packed pointer.
///
/// Empty data packs to `0` without calling `alloc`.
pub async fn write_bytes(
    caller: &mut Caller<'_, WorkerContext>,
    bytes: &[u8],
) -> Result<i64, HostFunctionError> {
    if bytes.is_empty() {
        return Ok(0);
    }

    let alloc = caller
        .get_export(ALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or_else(|| HostFunctionError::GuestMemory("alloc export not found".into()))?
        .typed::<i32, i32>(&*caller)
        .map_err(|e| HostFunctionError::GuestMemory(format!("alloc has the wrong type: {e}")))?;

    let too_large = || HostFunctionError::GuestMemory("data too large".into());
    let len = u32::try_from(bytes.len()).map_err(|_| too_large())?;
    let ptr = alloc
        .call_async(&mut *caller, i32::try_from(len).map_err(|_| too_large())?)
        .await
        .map_err(|e| HostFunctionError::GuestMemory(format!("alloc failed: {e}")))?;

    let memory = guest_memory(caller)?;
    let offset = u32::try_from(ptr)
        .map_err(|_| HostFunctionError::GuestMemory("alloc returned a negative pointer".into()))?;
    memory
        .write(&mut *caller, offset as usize, bytes)
        .map_err(|_| HostFunctionError::GuestMemory("alloc returned an out-of-bounds pointer".into()))?;

    Ok(pack_ptr_len(offset, len))
}

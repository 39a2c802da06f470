//! Host function registration for Wasmtime linkers.
//!
//! All imports live in module `env`:
//!
//! | Import | Signature | Returns |
//! |---|---|---|
//! | `log` | `(level, ptr, len)` | |
//! | `param` | `(name_ptr, name_len) -> i64` | packed value, `-1` if absent |
//! | `kv_get` | `(key_ptr, key_len) -> i64` | packed value, `-1` if absent |
//! | `kv_put` | `(key_ptr, key_len, val_ptr, val_len) -> i32` | `0`, `-1` quota, `-2` failure |
//! | `kv_delete` | `(key_ptr, key_len) -> i32` | `1` removed, `0` absent, `-2` failure |
//! | `fetch` | `(url_ptr, url_len) -> i64` | packed body, `-1` rejected, `-2` failed |
//! | `set_status` | `(status)` | |
//! | `set_header` | `(name_ptr, name_len, val_ptr, val_len)` | |
//!
//! Host calls never trap on bad input; they log and return an error code.

use std::sync::Arc;

use mini_edge_common::RuntimeError;
use mini_edge_core::store::WorkerContext;
use mini_edge_core::{InstanceRunner, WasmEngine};
use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

use crate::kv::{KV_FAILURE, KvHost};
use crate::logging::{LoggingHost, level_from_i32};
use crate::memory::{read_bytes, read_string, write_bytes};

/// Packed-return code: value absent or call rejected.
pub const ABSENT: i64 = -1;
/// Packed-return code: call failed.
pub const FAILED: i64 = -2;

fn registration_error(name: &str, e: &wasmtime::Error) -> RuntimeError {
    RuntimeError::invalid_config(format!("Failed to register {name} function: {e}"))
}

/// Create an [`InstanceRunner`] with every host function registered.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn create_instance_runner(engine: &WasmEngine) -> Result<InstanceRunner, RuntimeError> {
    let mut runner = InstanceRunner::new(Arc::new(engine.inner().clone()));
    register_all(runner.linker_mut())?;
    Ok(runner)
}

/// Register all host functions on a core module linker.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    register_logging(linker)?;
    register_params(linker)?;
    register_kv(linker)?;
    register_fetch(linker)?;
    register_response(linker)?;
    Ok(())
}

/// Register `env::log(level, ptr, len)`.
pub fn register_logging(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, WorkerContext>, level: i32, ptr: i32, len: i32| {
                let message = match read_bytes(&mut caller, ptr, len) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!(error = %e, "log: unreadable message");
                        return;
                    }
                };
                LoggingHost::log(caller.data_mut(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| registration_error("log", &e))?;

    Ok(())
}

/// Register `env::param(name_ptr, name_len) -> i64`.
pub fn register_params(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap_async(
            "env",
            "param",
            |mut caller: Caller<'_, WorkerContext>, (ptr, len): (i32, i32)| {
                Box::new(async move {
                    let name = match read_string(&mut caller, ptr, len) {
                        Ok(name) => name,
                        Err(e) => {
                            warn!(error = %e, "param: unreadable name");
                            return FAILED;
                        }
                    };
                    let Some(value) = caller.data().params.get(&name).cloned() else {
                        return ABSENT;
                    };
                    write_bytes(&mut caller, value.as_bytes())
                        .await
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "param: cannot return value");
                            FAILED
                        })
                })
            },
        )
        .map_err(|e| registration_error("param", &e))?;

    Ok(())
}

/// Register `env::kv_get`, `env::kv_put` and `env::kv_delete`.
pub fn register_kv(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap_async(
            "env",
            "kv_get",
            |mut caller: Caller<'_, WorkerContext>, (ptr, len): (i32, i32)| {
                Box::new(async move {
                    let key = match read_string(&mut caller, ptr, len) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(error = %e, "kv_get: unreadable key");
                            return FAILED;
                        }
                    };
                    let kv = caller.data().capabilities.kv.clone();
                    let Some(value) = KvHost::get(kv.as_ref(), &key).await else {
                        return ABSENT;
                    };
                    write_bytes(&mut caller, &value).await.unwrap_or_else(|e| {
                        warn!(error = %e, "kv_get: cannot return value");
                        FAILED
                    })
                })
            },
        )
        .map_err(|e| registration_error("kv_get", &e))?;

    linker
        .func_wrap_async(
            "env",
            "kv_put",
            |mut caller: Caller<'_, WorkerContext>,
             (key_ptr, key_len, val_ptr, val_len): (i32, i32, i32, i32)| {
                Box::new(async move {
                    let args = read_string(&mut caller, key_ptr, key_len).and_then(|key| {
                        read_bytes(&mut caller, val_ptr, val_len).map(|value| (key, value))
                    });
                    let (key, value) = match args {
                        Ok(args) => args,
                        Err(e) => {
                            warn!(error = %e, "kv_put: unreadable arguments");
                            return KV_FAILURE;
                        }
                    };
                    let kv = caller.data().capabilities.kv.clone();
                    KvHost::put(kv.as_ref(), &key, &value).await
                })
            },
        )
        .map_err(|e| registration_error("kv_put", &e))?;

    linker
        .func_wrap_async(
            "env",
            "kv_delete",
            |mut caller: Caller<'_, WorkerContext>, (ptr, len): (i32, i32)| {
                Box::new(async move {
                    let key = match read_string(&mut caller, ptr, len) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(error = %e, "kv_delete: unreadable key");
                            return KV_FAILURE;
                        }
                    };
                    let kv = caller.data().capabilities.kv.clone();
                    KvHost::delete(kv.as_ref(), &key).await
                })
            },
        )
        .map_err(|e| registration_error("kv_delete", &e))?;

    Ok(())
}

/// Register `env::fetch(url_ptr, url_len) -> i64`.
pub fn register_fetch(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap_async(
            "env",
            "fetch",
            |mut caller: Caller<'_, WorkerContext>, (ptr, len): (i32, i32)| {
                Box::new(async move {
                    let url = match read_string(&mut caller, ptr, len) {
                        Ok(url) => url,
                        Err(e) => {
                            warn!(error = %e, "fetch: unreadable url");
                            return FAILED;
                        }
                    };

                    caller.data_mut().metrics.fetches += 1;
                    let Some(fetcher) = caller.data().capabilities.fetch.clone() else {
                        debug!(url = %url, "fetch: no fetch capability");
                        return ABSENT;
                    };

                    let body = match fetcher.fetch(&url).await {
                        Ok(body) => body,
                        Err(e) if e.is_rejection() => return ABSENT,
                        Err(_) => return FAILED,
                    };
                    write_bytes(&mut caller, body.as_bytes())
                        .await
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "fetch: cannot return body");
                            FAILED
                        })
                })
            },
        )
        .map_err(|e| registration_error("fetch", &e))?;

    Ok(())
}

/// Register `env::set_status` and `env::set_header`.
pub fn register_response(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            "env",
            "set_status",
            |mut caller: Caller<'_, WorkerContext>, status: i32| match u16::try_from(status) {
                Ok(status) if (100..=599).contains(&status) => caller.data_mut().status = status,
                _ => warn!(status, "set_status: invalid status code"),
            },
        )
        .map_err(|e| registration_error("set_status", &e))?;

    linker
        .func_wrap(
            "env",
            "set_header",
            |mut caller: Caller<'_, WorkerContext>,
             name_ptr: i32,
             name_len: i32,
             val_ptr: i32,
             val_len: i32| {
                let header = read_string(&mut caller, name_ptr, name_len).and_then(|name| {
                    read_string(&mut caller, val_ptr, val_len).map(|value| (name, value))
                });
                match header {
                    Ok((name, value)) => caller.data_mut().set_header(&name, value),
                    Err(e) => warn!(error = %e, "set_header: unreadable header"),
                }
            },
        )
        .map_err(|e| registration_error("set_header", &e))?;

    Ok(())
}

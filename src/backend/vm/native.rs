// wisp native function library
// Changelog:
//      Initial version: the one native clox ships (`clock`), registered
//      as a global at VM startup — mirrors the teacher's
//      `load_standard_library` / `std_lib.rs` registration pattern.

use crate::common::value::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn clock(args: &[Value]) -> Result<Value, String> {
    if !args.is_empty() {
        return Err(format!("Expected 0 arguments but got {}.", args.len()));
    }
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "SystemTime before UNIX_EPOCH".to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

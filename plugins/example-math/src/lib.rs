//! Example native module
//!
//! Build with `cargo build -p hotswap-example-math` and point a hotswap
//! manifest at the resulting `libhotswap_example_math` shared library.
//! Edit a function body and rebuild while `hotswap run` is watching to see
//! the new code picked up without restarting the host.

#![warn(missing_docs, rust_2018_idioms)]

/// Returns a constant, handy for checking that a module is loaded at all
#[no_mangle]
pub extern "C" fn test_function() -> i32 {
    42
}

/// Wrapping 32-bit addition
#[no_mangle]
pub extern "C" fn add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

/// Wrapping 32-bit multiplication
#[no_mangle]
pub extern "C" fn multiply(a: i32, b: i32) -> i32 {
    a.wrapping_mul(b)
}

/// Wrapping 64-bit addition
#[no_mangle]
pub extern "C" fn add_i64(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

/// Floating point scaling
#[no_mangle]
pub extern "C" fn scale(value: f64, factor: f64) -> f64 {
    value * factor
}

//! Modules hosted by `tether serve`.

use std::f64::consts::{E, PI};

use tether::{FaultInfo, Namespace, Native, ObjectRef};

/// Every demo module with its import name.
pub fn modules() -> Vec<(&'static str, ObjectRef)> {
    vec![("mathlib", mathlib()), ("echo", echo()), ("store", store())]
}

/// Read-only float math.
fn mathlib() -> ObjectRef {
    Namespace::new("mathlib")
        .with("pi", PI)
        .with("e", E)
        .with_fn("sin", |args| unary("sin", &args, f64::sin))
        .with_fn("cos", |args| unary("cos", &args, f64::cos))
        .with_fn("sqrt", |args| {
            let [x] = floats::<1>("sqrt", &args)?;
            if x < 0.0 {
                return Err(FaultInfo::value_error("math domain error"));
            }
            Ok(Native::Float(x.sqrt()))
        })
        .with_fn("pow", |args| {
            let [x, y] = floats::<2>("pow", &args)?;
            Ok(Native::Float(x.powf(y)))
        })
        .read_only()
        .into_ref()
}

fn unary(name: &str, args: &[Native], f: fn(f64) -> f64) -> Result<Native, FaultInfo> {
    let [x] = floats::<1>(name, args)?;
    Ok(Native::Float(f(x)))
}

fn floats<const N: usize>(name: &str, args: &[Native]) -> Result<[f64; N], FaultInfo> {
    let fixed: &[Native; N] = args
        .try_into()
        .map_err(|_| FaultInfo::arity(name, N, args.len()))?;
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(fixed) {
        *slot = arg.float_arg("argument")?;
    }
    Ok(out)
}

/// Returns its argument, or a tuple of its arguments.
fn echo() -> ObjectRef {
    Namespace::new("echo")
        .with_fn("echo", |mut args| {
            Ok(if args.len() == 1 {
                args.remove(0)
            } else {
                Native::Tuple(args)
            })
        })
        .read_only()
        .into_ref()
}

/// A writable namespace holding a shared list.
fn store() -> ObjectRef {
    Namespace::new("store")
        .with("items", Native::list([]))
        .into_ref()
}

mod harness;
use harness::Program;
use wasmi::core::F64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CASES: usize = 200;

const ARITH: &str = r#"
export function add(a: Int64, b: Int64) -> Int64 { a + b }
export function sub(a: Int64, b: Int64) -> Int64 { a - b }
export function mul(a: Int64, b: Int64) -> Int64 { a * b }
export function div(a: Int64, b: Int64) -> Int64 { a / b }
export function rem(a: Int64, b: Int64) -> Int64 { a % b }
export function lt(a: Int64, b: Int64) -> Bool { a < b }
export function ge(a: Int64, b: Int64) -> Bool { a >= b }
export function neg(a: Int64) -> Int64 { -a }
"#;

#[test]
fn integer_arithmetic_matches_rust() {
    let mut p = Program::new(ARITH);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..CASES {
        let a: i64 = rng.gen_range(-1_000_000_000..=1_000_000_000);
        let b: i64 = rng.gen_range(-1_000_000_000..=1_000_000_000);
        let args = (a, b);
        assert_eq!(p.call::<(i64, i64), i64>("add", args), a + b, "add {args:?}");
        assert_eq!(p.call::<(i64, i64), i64>("sub", args), a - b, "sub {args:?}");
        assert_eq!(p.call::<(i64, i64), i64>("mul", args), a * b, "mul {args:?}");
        assert_eq!(p.call::<(i64, i64), i32>("lt", args), (a < b) as i32, "lt {args:?}");
        assert_eq!(p.call::<(i64, i64), i32>("ge", args), (a >= b) as i32, "ge {args:?}");
        assert_eq!(p.call::<i64, i64>("neg", a), -a, "neg {a}");
        if b != 0 {
            assert_eq!(p.call::<(i64, i64), i64>("div", args), a / b, "div {args:?}");
            assert_eq!(p.call::<(i64, i64), i64>("rem", args), a % b, "rem {args:?}");
        }
    }
}

#[test]
fn overflow_wraps() {
    let mut p = Program::new(ARITH);
    assert_eq!(p.call::<(i64, i64), i64>("add", (i64::MAX, 1)), i64::MIN);
    assert_eq!(p.call::<(i64, i64), i64>("mul", (i64::MAX, 2)), -2);
}

#[test]
fn float_arithmetic_matches_rust() {
    let src = r#"
export function blend(a: Float64, b: Float64) -> Float64 { a * 0.25 + b / 4.0 - 1.0 }
"#;
    let mut p = Program::new(src);
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..CASES {
        let a: f64 = rng.gen_range(-1e6..1e6);
        let b: f64 = rng.gen_range(-1e6..1e6);
        let expected = a * 0.25 + b / 4.0 - 1.0;
        assert_eq!(f64::from(p.call::<(F64, F64), F64>("blend", (a.into(), b.into()))), expected, "blend {a} {b}");
    }
}

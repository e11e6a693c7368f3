//! Nested sub-computations: scoping, discarding and second derivatives.

use approx::assert_relative_eq;
use ns_autodiff::{Dual, Error, Tape};
use proptest::prelude::*;

#[test]
fn test_nested_second_derivative() {
    // f(x) = x^3 + sin(x): g = f'(x) is built as a differentiable handle inside
    // the frame, then differentiated again.
    let t = Tape::new();
    let outer = t.var(0.25);
    let _keep = outer * outer;
    let len_before = t.len();

    t.push_nesting();
    let x0 = 1.3f64;
    let x = Dual::new(t.var(x0), t.var(1.0));
    let f = x * x * x + x.sin();
    let g = f.dot;
    assert_relative_eq!(g.val(), 3.0 * x0 * x0 + x0.cos(), epsilon = 1e-12);

    t.backward(g).unwrap();
    assert_relative_eq!(x.val.adjoint(), 6.0 * x0 - x0.sin(), epsilon = 1e-12);
    t.pop_nesting().unwrap();

    assert_eq!(t.len(), len_before);
}

#[test]
fn test_outer_gradient_unaffected_by_inner_work() {
    let t = Tape::new();
    let a = t.var(2.0);
    let b = t.var(3.0);
    let f = a * b;

    t.with_nested(|t| {
        let y = t.var(7.0);
        let z = (y * a).ln();
        t.backward(z).unwrap();
        assert_relative_eq!(y.adjoint(), 1.0 / 7.0, epsilon = 1e-12);
    });

    t.backward(f).unwrap();
    assert_relative_eq!(a.adjoint(), 3.0, epsilon = 1e-12);
    assert_relative_eq!(b.adjoint(), 2.0, epsilon = 1e-12);
}

#[test]
fn test_frames_nest_in_lifo_order() {
    let t = Tape::new();
    let _x = t.var(1.0);
    t.push_nesting();
    let _y = t.var(2.0);
    t.push_nesting();
    let _z = t.var(3.0);
    assert_eq!(t.nesting_depth(), 2);

    t.pop_nesting().unwrap();
    assert_eq!(t.len(), 2);
    t.pop_nesting().unwrap();
    assert_eq!(t.len(), 1);
    assert!(matches!(t.pop_nesting(), Err(Error::Nesting(_))));
}

#[test]
fn test_handle_from_popped_frame_rejected_after_regrowth() {
    let t = Tape::new();
    let outer = t.var(2.0);
    t.push_nesting();
    let stale = t.var(5.0);
    let stale_sq = stale * stale;
    t.pop_nesting().unwrap();

    let fresh = t.var(7.0);
    let more = fresh * outer + 1.0;
    assert!(t.len() >= 3);

    assert!(!t.is_live(stale));
    assert!(!t.is_live(stale_sq));
    assert!(t.is_live(outer));
    assert!(matches!(t.backward(stale), Err(Error::Gradient(_))));
    assert!(matches!(t.backward(stale_sq), Err(Error::Gradient(_))));

    t.backward(more).unwrap();
    assert_relative_eq!(fresh.adjoint(), 2.0, epsilon = 1e-12);
    assert_relative_eq!(outer.adjoint(), 7.0, epsilon = 1e-12);
}

#[test]
#[should_panic(expected = "stale handle")]
fn test_recording_with_stale_operand_panics() {
    let t = Tape::new();
    let outer = t.var(2.0);
    let stale = t.with_nested(|_| t.var(5.0));
    let _fresh = t.var(7.0);
    let _ = outer * stale;
}

#[test]
fn test_guard_pops_when_closure_panics() {
    let t = Tape::new();
    let _x = t.var(1.0);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        t.with_nested(|t| {
            let _y = t.var(2.0);
            panic!("boom");
        })
    }));
    assert!(result.is_err());
    assert_eq!(t.nesting_depth(), 0);
    assert_eq!(t.len(), 1);
}

#[test]
fn test_recover_memory_keeps_reserved_blocks() {
    let t = Tape::new();
    let xs = t.vars(&vec![1.0; 10_000]);
    let _s = t.sum(&xs);
    let reserved = t.stats().bytes_reserved;
    t.recover_memory().unwrap();

    let stats = t.stats();
    assert_eq!(stats.nodes, 0);
    assert_eq!(stats.operand_slots, 0);
    assert!(stats.bytes_reserved > 0);
    assert!(stats.bytes_reserved <= reserved);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    // Push, record N arbitrary nodes (including n-ary ones), pop: memory
    // accounting returns to the pre-push state.
    #[test]
    fn prop_nesting_round_trip(
        n in 0usize..400,
        seed in proptest::collection::vec(-5.0f64..5.0, 1..16),
    ) {
        let t = Tape::new();
        let outer = t.vars(&seed);
        let _o = t.sum(&outer);
        let before = t.stats();

        t.push_nesting();
        let mut acc = t.var(0.5);
        for i in 0..n {
            acc = match i % 4 {
                0 => acc + outer[i % outer.len()],
                1 => t.dot_const(&outer, &vec![0.1; outer.len()]).unwrap() * acc,
                2 => t.log_sum_exp_slice(&[acc, outer[0]]),
                _ => acc.tanh(),
            };
        }
        t.pop_nesting().unwrap();

        let after = t.stats();
        prop_assert_eq!(after.nodes, before.nodes);
        prop_assert_eq!(after.operand_slots, before.operand_slots);
        prop_assert_eq!(after.real_slots, before.real_slots);
    }
}

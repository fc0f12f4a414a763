#![no_main]

use autofuse_decider::DeciderRegistry;
use autofuse_solver::{FusionStrategySolver, SolverConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut graph) = autofuse_parser::parse(source) else {
        return;
    };
    // Bounded solve: accepted graphs must never panic the solver, and a
    // cyclic input must surface as an error, not a hang.
    let solver = FusionStrategySolver::new(SolverConfig {
        max_fuse_rounds: 3,
        ..SolverConfig::default()
    });
    let _ = solver.fuse(&mut graph, &DeciderRegistry::with_builtins());
});

//! # Planner Benchmark
//!
//! Plans a lawnmower survey past a moving obstacle and a small island with each strategy.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use plan_lib::{
    map::GridWorldMap,
    obstacles::{ObstacleModelKind, ObstacleSnapshot},
    plan::Plan,
    planner::{Planner, PlannerChoice, PlannerConfig, PlannerParams},
    ribbon::RibbonManager,
    state::State,
};

/// Time each planner invocation is allowed.
const PLANNING_TIME_S: f64 = 0.1;

fn planner_benchmark(c: &mut Criterion) {
    // ---- Build the problem ----

    let params = PlannerParams {
        max_speed_ms: 2.0,
        turning_radius_m: 4.0,
        coverage_turning_radius_m: 8.0,
        random_seed: Some(42),
        ..PlannerParams::default()
    };
    let mut config = PlannerConfig::from_params(&params, Arc::new(|| 0.0));

    // 4 m island in the middle of the survey area
    let mut grid = String::from("4\n");
    for row in 0..12 {
        for col in 0..12 {
            grid.push(if row == 6 && (5..7).contains(&col) { '#' } else { '.' });
        }
        grid.push('\n');
    }
    config.map = Arc::new(GridWorldMap::parse(&grid).unwrap());

    let mut ribbons = RibbonManager::default();
    for i in 0..6 {
        let y = 5.0 + 8.0 * i as f64;
        ribbons.add(0.0, y, 40.0, y);
    }

    let mut obstacles = ObstacleSnapshot::default();
    obstacles.binary.update(
        1,
        &State::new(60.0, 20.0, std::f64::consts::PI, 1.0, 0.0),
        2.0,
        6.0,
    );
    obstacles.gaussian.update(
        1,
        &State::new(60.0, 20.0, std::f64::consts::PI, 1.0, 0.0),
    );

    let start = State::new(-10.0, 0.0, 0.0, 2.0, 0.0);

    // ---- Bench each strategy ----

    let mut group = c.benchmark_group("Planner::plan");
    group.sample_size(10);

    for choice in [
        PlannerChoice::BitStar,
        PlannerChoice::AStar,
        PlannerChoice::PotentialField,
    ]
    .iter()
    {
        for kind in [ObstacleModelKind::Binary, ObstacleModelKind::Gaussian].iter() {
            obstacles.kind = *kind;

            let planner = choice.build();
            group.bench_function(format!("{}::{:?}", planner.name(), kind), |b| {
                b.iter(|| {
                    planner
                        .plan(
                            &ribbons,
                            &start,
                            &config,
                            &Plan::new(),
                            PLANNING_TIME_S,
                            &obstacles,
                        )
                        .unwrap()
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, planner_benchmark);
criterion_main!(benches);

//! Ready-made demo scenario: a ten-server microservice topology with six
//! weighted traffic patterns, from a lightweight cache read up to a heavy
//! admin batch.

use crate::arrivals::ArrivalProcess;
use crate::config::{DrainPolicy, ScenarioConfig};
use crate::pattern::{PatternSpec, Step};
use crate::server::ServerSpec;

fn server(name: &str, cpu: usize, ram_gb: f64, disk_q: usize, net_mbps: f64) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        cpu_capacity: cpu,
        ram_capacity_gb: ram_gb,
        disk_queue_capacity: disk_q,
        network_bandwidth_mbps: net_mbps,
    }
}

fn seq(server: &str, cpu_ms: f64, ram_gb: f64, disk_mb: f64, net_mb: f64) -> Step {
    Step::Sequential {
        server: server.to_string(),
        cpu_ms,
        ram_gb,
        disk_mb,
        net_mb,
    }
}

/// The demo ten-server topology.
pub fn demo_topology() -> Vec<ServerSpec> {
    vec![
        server("Nginx", 8, 16.0, 16, 40000.0),
        server("APP1", 16, 64.0, 16, 1000.0),
        server("Auth", 4, 32.0, 16, 1000.0),
        server("Policy", 8, 32.0, 16, 1000.0),
        server("Service", 16, 64.0, 16, 1000.0),
        server("DB", 32, 128.0, 64, 1000.0),
        server("Logger", 4, 16.0, 16, 1000.0),
        server("S3", 4, 32.0, 128, 1000.0),
        server("ServiceHub", 16, 64.0, 16, 1000.0),
        server("APP2", 16, 64.0, 16, 1000.0),
    ]
}

/// The demo pattern catalog. Weights sum to 100, so each weight reads as a
/// selection percentage.
pub fn demo_catalog() -> Vec<PatternSpec> {
    vec![
        PatternSpec {
            id: "simple_read".to_string(),
            weight: 40.0,
            steps: vec![
                seq("Nginx", 5.0, 1.0, 10.0, 0.5),
                seq("APP1", 20.0, 1.0, 10.0, 5.0),
                seq("Service", 30.0, 1.0, 10.0, 5.0),
                seq("APP2", 15.0, 1.0, 10.0, 5.0),
            ],
        },
        PatternSpec {
            id: "user_auth".to_string(),
            weight: 25.0,
            steps: vec![
                seq("Nginx", 10.0, 1.0, 10.0, 1.0),
                seq("APP1", 40.0, 2.0, 10.0, 5.0),
                Step::Parallel {
                    children: vec![
                        seq("Auth", 60.0, 2.0, 10.0, 5.0),
                        seq("Policy", 45.0, 1.0, 10.0, 5.0),
                    ],
                },
                seq("Service", 50.0, 2.0, 10.0, 5.0),
                seq("APP2", 30.0, 2.0, 10.0, 5.0),
            ],
        },
        PatternSpec {
            id: "data_processing".to_string(),
            weight: 20.0,
            steps: vec![
                seq("Nginx", 10.0, 1.0, 10.0, 2.0),
                seq("APP1", 50.0, 3.0, 10.0, 5.0),
                seq("Service", 100.0, 4.0, 10.0, 5.0),
                seq("DB", 200.0, 8.0, 100.0, 5.0),
                seq("ServiceHub", 80.0, 3.0, 10.0, 5.0),
                seq("APP2", 60.0, 3.0, 10.0, 5.0),
            ],
        },
        PatternSpec {
            id: "file_upload".to_string(),
            weight: 8.0,
            steps: vec![
                seq("Nginx", 15.0, 1.0, 10.0, 50.0),
                seq("APP1", 80.0, 8.0, 10.0, 5.0),
                seq("Auth", 40.0, 1.0, 10.0, 5.0),
                seq("Service", 120.0, 6.0, 10.0, 5.0),
                Step::Parallel {
                    children: vec![
                        seq("S3", 30.0, 10.0, 500.0, 100.0),
                        seq("Logger", 25.0, 2.0, 10.0, 5.0),
                    ],
                },
                seq("APP2", 40.0, 4.0, 10.0, 5.0),
            ],
        },
        PatternSpec {
            id: "analytics".to_string(),
            weight: 5.0,
            steps: vec![
                seq("Nginx", 10.0, 1.0, 10.0, 3.0),
                seq("APP1", 100.0, 8.0, 10.0, 5.0),
                Step::Parallel {
                    children: vec![
                        seq("Service", 300.0, 12.0, 10.0, 5.0),
                        seq("DB", 400.0, 16.0, 200.0, 10.0),
                    ],
                },
                seq("ServiceHub", 200.0, 8.0, 10.0, 5.0),
                seq("APP2", 80.0, 6.0, 10.0, 5.0),
                // Result logging happens off the request path.
                Step::Async {
                    child: Box::new(seq("Logger", 30.0, 3.0, 10.0, 5.0)),
                },
            ],
        },
        PatternSpec {
            id: "admin_task".to_string(),
            weight: 2.0,
            steps: vec![
                seq("Nginx", 20.0, 1.0, 10.0, 5.0),
                seq("APP1", 150.0, 10.0, 10.0, 5.0),
                Step::Parallel {
                    children: vec![
                        seq("Auth", 80.0, 3.0, 10.0, 5.0),
                        seq("Policy", 120.0, 4.0, 10.0, 5.0),
                    ],
                },
                seq("Service", 250.0, 8.0, 10.0, 5.0),
                seq("DB", 300.0, 20.0, 150.0, 8.0),
                seq("ServiceHub", 180.0, 6.0, 10.0, 5.0),
                Step::Parallel {
                    children: vec![
                        seq("S3", 50.0, 8.0, 300.0, 50.0),
                        seq("Logger", 40.0, 4.0, 10.0, 5.0),
                    ],
                },
                seq("APP2", 100.0, 8.0, 10.0, 5.0),
            ],
        },
    ]
}

/// A full demo scenario at the given load level.
pub fn demo_scenario(arrival_rate: f64, horizon_seconds: f64) -> ScenarioConfig {
    ScenarioConfig {
        servers: demo_topology(),
        patterns: demo_catalog(),
        arrival_rate,
        horizon_seconds,
        random_seed: None,
        drain_policy: DrainPolicy::Complete,
        arrival_process: ArrivalProcess::Poisson,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pattern::PatternCatalog;
    use crate::server::Topology;

    #[test]
    fn demo_scenario_compiles_cleanly() {
        let topology = Topology::build(&demo_topology()).unwrap();
        assert_eq!(topology.len(), 10);

        let catalog = PatternCatalog::compile(&demo_catalog(), &topology).unwrap();
        assert_eq!(catalog.patterns().len(), 6);
        assert_eq!(catalog.selector().total_weight(), 100.0);
    }

    #[test]
    fn demo_scenario_validates() {
        assert!(demo_scenario(2.0, 60.0).validate().is_ok());
    }
}

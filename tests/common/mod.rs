//! Shared fixtures: a three-member in-memory cluster served over HTTP.

#![allow(dead_code, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pg_ha_coordinator::adapter::{DatabaseAdapter, InMemoryAdapter, NodeState};
use pg_ha_coordinator::api;
use pg_ha_coordinator::app_state::AppState;
use pg_ha_coordinator::dcs::{CoordinationStore, InMemoryStore};
use pg_ha_coordinator::domain::{
    Cluster, EventBus, HaConfig, Leader, Member, TimelinePosition, WalPosition,
};
use pg_ha_coordinator::service::HaCoordinator;

pub struct TestApp {
    pub addr: SocketAddr,
    pub coordinator: Arc<HaCoordinator>,
    pub adapter: Arc<InMemoryAdapter>,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// `m1` leads at 10000; `m2` lags far behind; `m3` is close.
pub fn cluster(leader: Option<&str>) -> Cluster {
    Cluster {
        leader: leader.map(|name| Leader {
            name: name.to_string(),
            acquire_time: None,
            renew_time: None,
        }),
        members: ["m1", "m2", "m3"]
            .iter()
            .map(|name| Member::new(*name, format!("{name}.pg.svc"), 5432))
            .collect(),
        ha_config: HaConfig {
            max_lag_on_switchover: 1_000,
            ..HaConfig::default()
        },
        op_time: Some(TimelinePosition::new(1, WalPosition::new(10_000))),
    }
}

/// Serves the full application for member `local` on an ephemeral port.
pub async fn spawn_app(local: &str, cluster: Cluster) -> TestApp {
    let adapter = Arc::new(InMemoryAdapter::new(local));
    adapter.set_node(NodeState::primary("m1", 1, 10_000)).await;
    adapter.set_node(NodeState::secondary("m2", 1, 2_000)).await;
    adapter.set_node(NodeState::secondary("m3", 1, 9_500)).await;

    let store = Arc::new(InMemoryStore::new(cluster));
    let coordinator = Arc::new(HaCoordinator::new(
        Arc::clone(&store) as Arc<dyn CoordinationStore>,
        Arc::clone(&adapter) as Arc<dyn DatabaseAdapter>,
        EventBus::new(64),
        Duration::from_millis(500),
    ));

    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("expected an ephemeral port");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("expected a local address");
    };
    let app = api::app(AppState::new(Arc::clone(&coordinator)));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestApp {
        addr,
        coordinator,
        adapter,
        store,
    }
}

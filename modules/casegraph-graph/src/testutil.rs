//! Neo4j container for integration tests that need a real database.

use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use crate::{migrate, GraphClient};

/// Dimensions of the vector indexes created in test databases.
pub const TEST_EMBEDDING_DIMENSIONS: usize = 8;

/// Start a Neo4j community container, connect, and run migrations.
///
/// The container stops when the returned handle is dropped, so keep it alive for the
/// whole test.
pub async fn neo4j_container() -> (ContainerAsync<GenericImage>, GraphClient) {
    let image = GenericImage::new("neo4j", "5.25.1")
        .with_exposed_port(ContainerPort::Tcp(7687))
        .with_wait_for(WaitFor::message_on_stdout("Started."))
        .with_env_var("NEO4J_AUTH", "neo4j/casegraph-test");

    let container = image
        .start()
        .await
        .expect("Failed to start Neo4j container");

    let host_port = container
        .get_host_port_ipv4(7687)
        .await
        .expect("Failed to get Neo4j host port");

    let uri = format!("bolt://127.0.0.1:{host_port}");
    let client = GraphClient::connect(&uri, "neo4j", "casegraph-test")
        .await
        .expect("Failed to connect to Neo4j");
    migrate(&client, TEST_EMBEDDING_DIMENSIONS)
        .await
        .expect("Failed to migrate test database");

    (container, client)
}

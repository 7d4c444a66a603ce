//! Integration tests for the Docker client
//!
//! These tests require a Docker daemon listening on TCP.
//! Set DOCKER_ENDPOINT (default http://127.0.0.1:2375) to run.

use runtime_client::{
    CommandRunner, ContainerConfig, ContainerRuntime, CreateContainerOptions, DockerClient, ImagePuller,
};

fn client() -> DockerClient {
    let endpoint = std::env::var("DOCKER_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:2375".to_string());
    DockerClient::new(endpoint).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running Docker daemon
async fn test_ping_and_list() {
    let client = client();
    client.ping().await.expect("Docker daemon not reachable");

    let containers = client.list_containers(true).await.expect("Failed to list containers");
    println!("Found {} containers", containers.len());
}

#[tokio::test]
#[ignore]
async fn test_pull_unknown_image_fails() {
    let client = client();
    let result = client.pull_image("podlet-test/does-not-exist:never").await;
    assert!(result.is_err(), "Pulling a missing image should fail");
}

#[tokio::test]
#[ignore]
async fn test_container_lifecycle() {
    let client = client();
    client.pull_image("busybox:latest").await.expect("Failed to pull busybox");

    let name = format!("podlet-it-{}", std::process::id());
    let options = CreateContainerOptions {
        name: name.clone(),
        config: ContainerConfig {
            image: "busybox:latest".to_string(),
            cmd: vec!["sleep".to_string(), "60".to_string()],
            ..Default::default()
        },
    };
    let id = client.create_container(&options).await.expect("Failed to create container");
    client.start_container(&id).await.expect("Failed to start container");

    let details = client.inspect_container(&id).await.expect("Failed to inspect container");
    assert!(details.state.running);
    assert_eq!(details.name, format!("/{}", name));

    let output = client
        .run_in_container(&id, &["echo".to_string(), "hello".to_string()])
        .await
        .expect("Failed to exec");
    assert!(output.succeeded());
    assert!(String::from_utf8_lossy(&output.output).contains("hello"));

    client.stop_container(&id, 1).await.expect("Failed to stop container");
    client.remove_container(&id, true).await.expect("Failed to remove container");

    let err = client.inspect_container(&id).await.unwrap_err();
    assert!(err.is_not_found());
}

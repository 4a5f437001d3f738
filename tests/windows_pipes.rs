//! Windows Named Pipes transport tests
//!
//! These tests verify the broker over a real named pipe, including the DACL
//! attached to every pipe instance.

#![allow(clippy::expect_used, clippy::unwrap_used)]

#[cfg(windows)]
mod windows_pipe_tests {
    use privilege_broker::{
        BrokerClient, BrokerConfig, BrokerServer, Diagnostics, Dispatcher, ProtocolError,
        Request, RequestTask, Response,
    };
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_config(name: &str) -> BrokerConfig {
        let name = format!("{name}-{}", std::process::id());
        BrokerConfig::default_with_overrides(|c| c.channel.name = name)
    }

    fn dispatcher() -> Dispatcher {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(RequestTask::Task1, |req| {
                Ok(Response::success(req.message_body.clone()))
            })
            .expect("register");
        dispatcher
    }

    #[tokio::test]
    async fn test_named_pipe_roundtrip_and_stop() {
        let config = test_config("broker-test-roundtrip");
        let handle = BrokerServer::new(&config, dispatcher(), Diagnostics::tracing_only())
            .spawn()
            .expect("spawn broker");
        let client = BrokerClient::new(&config, Diagnostics::tracing_only());

        let response = timeout(
            Duration::from_secs(5),
            client.call(&Request::new(RequestTask::Task1, "Hello, Windows Pipes!")),
        )
        .await
        .expect("Response timeout")
        .expect("call");
        assert_eq!(response, Response::success("Hello, Windows Pipes!"));

        client.call(&Request::stop()).await.expect("stop");
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .unwrap()
            .expect("server loop result");

        let after = client.call(&Request::new(RequestTask::Task1, "")).await;
        assert!(matches!(after, Err(ProtocolError::ChannelClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_busy_pipe_callers_are_all_served() {
        let config = test_config("broker-test-busy");
        let handle = BrokerServer::new(&config, dispatcher(), Diagnostics::tracing_only())
            .spawn()
            .expect("spawn broker");

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let client = BrokerClient::new(&config, Diagnostics::tracing_only());
            tasks.spawn(async move {
                client
                    .call(&Request::new(RequestTask::Task1, format!("caller-{i}")))
                    .await
            });
        }
        while let Some(res) = tasks.join_next().await {
            assert!(!res.unwrap().expect("call").is_error());
        }

        let client = BrokerClient::new(&config, Diagnostics::tracing_only());
        client.call(&Request::stop()).await.expect("stop");
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .unwrap()
            .expect("server loop result");
    }
}

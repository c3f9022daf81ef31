#![allow(clippy::disallowed_methods)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::ProcessExecutor;
use client::{ClientError, HttpGateway, RemoteEnv};
use roam::{ExecutorKind, Roam, ServerConfig};
use roam_core::{CallArgs, CancelAck, JobPayload, JobStatus};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const WAIT: Duration = Duration::from_secs(20);

struct TestServer {
    url: String,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), roam::ServerError>>,
}

impl TestServer {
    async fn start(executor: ExecutorKind) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = ServerConfig::default();
        config.workers = 2;
        config.executor = executor;
        config.lease_wait = Duration::from_millis(200);
        config.heartbeat_interval = Duration::from_millis(200);

        let roam = match executor {
            // Job processes are this package's own binary
            ExecutorKind::Process => {
                let executor = ProcessExecutor::new(env!("CARGO_BIN_EXE_roam"), ["exec"]);
                Roam::start_with(&config, Arc::new(executor)).await?
            }
            ExecutorKind::Task => Roam::start(&config).await?,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(roam.serve(listener, async {
            let _ = stopped.await;
        }));

        Ok(Self {
            url,
            stop: Some(stop),
            handle,
        })
    }

    fn env(&self) -> RemoteEnv {
        RemoteEnv::connect(self.url.clone()).expect("client builds")
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = tokio::time::timeout(WAIT, self.handle).await;
    }
}

#[tokio::test]
async fn remote_calls_run_in_job_processes() -> TestResult {
    let server = TestServer::start(ExecutorKind::Process).await?;
    let env = server.env();

    let add = env.function::<i64>("add");
    let sum = tokio::time::timeout(WAIT, add.call(CallArgs::new().arg(2).arg(2))).await??;
    assert_eq!(sum, 4);

    // Structured results survive the round trip
    let echo = env.function::<Value>("echo");
    let value = json!({ "name": "roam", "tags": [1, 2, 3] });
    let echoed = tokio::time::timeout(WAIT, echo.call(CallArgs::new().arg(value.clone()))).await??;
    assert_eq!(echoed, value);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn output_streams_to_the_caller() -> TestResult {
    let server = TestServer::start(ExecutorKind::Process).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let count = {
        let seen = seen.clone();
        server
            .env()
            .function::<u64>("count")
            .on_output(move |v| seen.lock().unwrap().push(v.clone()))
    };

    let n = tokio::time::timeout(
        WAIT,
        count.call(CallArgs::new().arg(4).kwarg("delay_ms", 10)),
    )
    .await??;
    assert_eq!(n, 4);
    assert_eq!(*seen.lock().unwrap(), vec![json!(0), json!(1), json!(2), json!(3)]);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn remote_errors_reach_the_caller() -> TestResult {
    let server = TestServer::start(ExecutorKind::Process).await?;
    let env = server.env();

    let fail = env.function::<Value>("fail");
    let err = tokio::time::timeout(
        WAIT,
        fail.call(CallArgs::new().arg("bad input").kwarg("kind", "ValueError")),
    )
    .await?
    .unwrap_err();
    assert_eq!(
        err,
        ClientError::Execution {
            kind: "ValueError".into(),
            message: "bad input".into(),
        }
    );

    let missing = env.function::<Value>("no_such_function");
    let err = tokio::time::timeout(WAIT, missing.call(CallArgs::new()))
        .await?
        .unwrap_err();
    assert!(matches!(err, ClientError::Execution { ref kind, .. } if kind == "UnknownFunction"));

    // Rejected before a job exists
    let err = env
        .function::<Value>("not a name")
        .call(CallArgs::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Submission(_)));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn slow_calls_time_out() -> TestResult {
    let server = TestServer::start(ExecutorKind::Process).await?;

    let sleep = server.env().function::<u64>("sleep").with_timeout(1);
    let err = tokio::time::timeout(WAIT, sleep.call(CallArgs::new().arg(30_000)))
        .await?
        .unwrap_err();
    assert!(matches!(err, ClientError::Execution { ref kind, .. } if kind == "Timeout"));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn running_calls_can_be_cancelled() -> TestResult {
    let server = TestServer::start(ExecutorKind::Task).await?;
    let gateway = HttpGateway::new(server.url.clone())?;
    let env = RemoteEnv::new(gateway.clone());

    let job_id = env
        .submit(&JobPayload::new("sleep", CallArgs::new().arg(30_000)))
        .await?;

    // Wait for a worker to pick it up
    let picked_up = async {
        loop {
            match gateway.job(job_id).await {
                Ok(job) if job.status == JobStatus::Running => return Ok(()),
                Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
                Err(e) => return Err(e),
            }
        }
    };
    tokio::time::timeout(WAIT, picked_up).await??;

    assert_eq!(env.cancel(job_id).await?, CancelAck::Requested);
    let err = tokio::time::timeout(WAIT, env.wait(job_id, None))
        .await?
        .unwrap_err();
    assert_eq!(err, ClientError::Cancelled { job_id });
    assert_eq!(gateway.job(job_id).await?.status, JobStatus::Cancelled);

    // Cancelling again is acknowledged without effect
    assert_eq!(env.cancel(job_id).await?, CancelAck::AlreadyFinished);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn finished_jobs_can_be_read_back() -> TestResult {
    let server = TestServer::start(ExecutorKind::Task).await?;
    let gateway = HttpGateway::new(server.url.clone())?;
    let env = RemoteEnv::new(gateway.clone());

    let job_id = env
        .submit(&JobPayload::new("add", CallArgs::new().arg(1).arg(2)))
        .await?;
    let value = tokio::time::timeout(WAIT, env.wait(job_id, None)).await??;
    assert_eq!(value, json!(3));

    let job = gateway.job(job_id).await?;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 1);

    // Reading the log again replays it to the same result
    let replayed = env.wait(job_id, None).await?;
    assert_eq!(replayed, json!(3));

    let err = gateway.job(roam_core::JobId::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn zero_heartbeats_are_refused_at_startup() {
    let mut config = ServerConfig::default();
    config.executor = ExecutorKind::Task;
    config.heartbeat_interval = Duration::ZERO;

    let err = Roam::start(&config).await.unwrap_err();
    assert!(matches!(err, roam::ServerError::Config(_)));
}

#[test]
fn blocking_calls_work_from_plain_threads() -> TestResult {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let server = runtime.block_on(TestServer::start(ExecutorKind::Task))?;

    let env = RemoteEnv::connect(server.url.clone())?;
    let add = env.function::<i64>("add");
    assert_eq!(add.call_blocking(CallArgs::new().arg(2).arg(2))?, 4);

    let fail = env.function::<Value>("fail");
    let err = fail.call_blocking(CallArgs::new().arg("boom")).unwrap_err();
    assert!(matches!(err, ClientError::Execution { ref message, .. } if message == "boom"));

    runtime.block_on(server.stop());
    Ok(())
}

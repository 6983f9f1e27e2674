// Copyright 2025 The runbox authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! WebSocket execution sessions.
//!
//! One session drives one job: it consumes the access token carried by the
//! first frame, validates the snippet, launches the executor on a blocking
//! worker, and relays bus messages to the socket while feeding client
//! input back into the terminal. Every terminal path either forwards a
//! terminal frame or closes with a code; nothing is swallowed.

use crate::{metrics, AppState};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use commons::prelude_errors::*;
use rand::Rng;
use runbox::bus::{complete_topic, output_topic, Event, MessageBus, StreamKind, Subscription};
use runbox::exec::{CancelFlag, InputQueue, OutputCallback, INPUT_QUEUE_CAPACITY};
use runbox::store::JobStore;
use runbox::validate::{validate_language, Verdict};
use runbox::{validate_source_size, Language};
use std::time::Duration;

/// Wait for the initial `execute` frame.
const FIRST_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the terminal event after an upstream cancellation.
const CANCEL_DEADLINE: Duration = Duration::from_secs(3);

/// Client-to-server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// The single request frame, first on the socket.
    Execute {
        /// Job identifier from token issuance.
        #[serde(rename = "jobId")]
        job_id: String,
        /// Single-use access token.
        #[serde(rename = "jobToken")]
        job_token: String,
        /// Source snippet to run.
        code: String,
        /// Language tag.
        language: String,
    },
    /// Keystrokes for the running program, forwarded verbatim.
    Input {
        /// Bytes for the terminal; the client appends its own newline.
        data: String,
    },
}

/// Server-to-client frames.
#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// One chunk of terminal output.
    Output {
        /// `stdout` or `stderr`.
        stream: String,
        /// Chunk contents.
        data: String,
    },
    /// Terminal frame on the success path.
    Complete {
        /// Final exit status.
        exit_code: i32,
        /// Wall-clock runtime in seconds.
        execution_time: f64,
    },
    /// Terminal frame for rejections and engine failures.
    Error {
        /// Failure description.
        message: String,
    },
}

impl From<Event> for ServerFrame {
    fn from(event: Event) -> Self {
        match event {
            Event::Output { stream, data, .. } => ServerFrame::Output {
                stream: stream.to_string(),
                data: String::from_utf8_lossy(&data).into_owned(),
            },
            Event::Complete {
                exit_code,
                elapsed_secs,
                ..
            } => ServerFrame::Complete {
                exit_code,
                execution_time: elapsed_secs,
            },
            Event::Error { message, .. } => ServerFrame::Error { message },
        }
    }
}

/// WebSocket entry point.
pub async fn ws_execute(
    req: HttpRequest,
    body: web::Payload,
    app_data: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;
    actix_web::rt::spawn(run_session(
        app_data.get_ref().clone(),
        session,
        msg_stream,
    ));
    Ok(response)
}

/// Drive one session to its close frame.
pub(crate) async fn run_session(state: AppState, mut session: Session, mut stream: MessageStream) {
    let reason = drive_session(&state, &mut session, &mut stream).await;
    let _ = session.close(Some(reason)).await;
}

fn reject(code: CloseCode, description: &str) -> CloseReason {
    CloseReason {
        code,
        description: Some(description.to_string()),
    }
}

async fn drive_session(
    state: &AppState,
    session: &mut Session,
    stream: &mut MessageStream,
) -> CloseReason {
    // AWAIT_FIRST: exactly one execute frame, within the deadline.
    let text = match tokio::time::timeout(FIRST_MESSAGE_TIMEOUT, stream.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => {
            metrics::SESSIONS_REJECTED_TOTAL
                .with_label_values(&["protocol"])
                .inc();
            return reject(CloseCode::Policy, "expected an execute frame");
        }
        Err(_) => {
            metrics::SESSIONS_REJECTED_TOTAL
                .with_label_values(&["timeout"])
                .inc();
            return reject(CloseCode::Policy, "no execute frame within 5s");
        }
    };
    let (job_id, job_token, code, language_tag) =
        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Execute {
                job_id,
                job_token,
                code,
                language,
            }) => (job_id, job_token, code, language),
            _ => {
                metrics::SESSIONS_REJECTED_TOTAL
                    .with_label_values(&["protocol"])
                    .inc();
                return reject(CloseCode::Policy, "expected an execute frame");
            }
        };

    // Token consumption is single-shot; a replay dies here.
    match state.store.consume_token(&job_token).await {
        Ok(token_job_id) if token_job_id == job_id => {}
        _ => {
            metrics::SESSIONS_REJECTED_TOTAL
                .with_label_values(&["auth"])
                .inc();
            return reject(CloseCode::Policy, "invalid job token");
        }
    }
    let job = match state.store.get(&job_id).await {
        Ok(job) => job,
        Err(_) => {
            metrics::SESSIONS_REJECTED_TOTAL
                .with_label_values(&["auth"])
                .inc();
            return reject(CloseCode::Policy, "unknown job");
        }
    };

    // VALIDATING.
    let verdict = match Language::parse(&language_tag) {
        Err(_) => (None, Verdict::reject("unsupported language")),
        Ok(language) => match validate_source_size(&code, state.settings.max_code_bytes) {
            Err(err) => (Some(language), Verdict::reject(err.to_string())),
            Ok(()) => (Some(language), validate_language(language, &code)),
        },
    };
    let language = match verdict {
        (_, Verdict { accepted: false, reason }) => {
            info!("rejected job {}: {}", job_id, reason);
            let frame = ServerFrame::Error {
                message: reason.clone(),
            };
            let _ = send_frame(session, &frame).await;
            if let Err(err) =
                with_retry(|| state.store.mark_failed(&job_id, reason.clone(), None)).await
            {
                error!("could not mark job {} failed: {}", job_id, err);
            }
            metrics::SESSIONS_REJECTED_TOTAL
                .with_label_values(&["validation"])
                .inc();
            return reject(CloseCode::Unsupported, "validation rejected");
        }
        (Some(language), _) => language,
        // Unreachable: a missing language never validates.
        (None, _) => return reject(CloseCode::Unsupported, "validation rejected"),
    };

    // RUNNING: settle the record, join the topics, launch the worker.
    if let Err(err) = with_retry(|| state.store.mark_processing(&job_id)).await {
        error!("could not mark job {} processing: {}", job_id, err);
        let _ = send_frame(
            session,
            &ServerFrame::Error {
                message: "job store unavailable".to_string(),
            },
        )
        .await;
        return reject(CloseCode::Error, "job store unavailable");
    }
    let mut output_sub = state.bus.subscribe(&output_topic(&job_id));
    let mut complete_sub = state.bus.subscribe(&complete_topic(&job_id));
    let (input_tx, input_rx) = tokio::sync::mpsc::channel(INPUT_QUEUE_CAPACITY);
    let cancel = CancelFlag::new();

    tokio::spawn(launch_job(
        state.clone(),
        job_id.clone(),
        job.filename.clone(),
        language,
        code,
        input_rx,
        cancel.clone(),
    ));

    let mut output_open = true;
    loop {
        tokio::select! {
            event = output_sub.recv(), if output_open => match event {
                Some(event) => {
                    if send_frame(session, &ServerFrame::from(event)).await.is_err() {
                        // Client gone mid-stream.
                        cancel_and_settle(&cancel, &mut complete_sub).await;
                        return reject(CloseCode::Normal, "client disconnected");
                    }
                }
                None => output_open = false,
            },
            event = complete_sub.recv() => {
                // Flush buffered output so no chunk follows the terminal
                // frame on the wire.
                while let Some(chunk) = output_sub.try_next() {
                    let _ = send_frame(session, &ServerFrame::from(chunk)).await;
                }
                return match event {
                    Some(event @ Event::Complete { .. }) => {
                        let _ = send_frame(session, &ServerFrame::from(event)).await;
                        CloseReason::from(CloseCode::Normal)
                    }
                    Some(event @ Event::Error { .. }) => {
                        let _ = send_frame(session, &ServerFrame::from(event)).await;
                        reject(CloseCode::Error, "execution failed")
                    }
                    Some(_) | None => {
                        error!("job {} topics closed without a terminal event", job_id);
                        reject(CloseCode::Error, "internal error")
                    }
                };
            },
            msg = stream.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::Input { data }) => {
                            // Client-send order is preserved by the bounded
                            // channel; a full queue applies backpressure.
                            let _ = input_tx.send(data.into_bytes()).await;
                        }
                        _ => {
                            cancel_and_settle(&cancel, &mut complete_sub).await;
                            return reject(CloseCode::Policy, "unexpected frame");
                        }
                    }
                }
                Some(Ok(Message::Ping(bytes))) => {
                    let _ = session.pong(&bytes).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Nop)) => {}
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    // CANCELLING: stop the executor, await its terminal
                    // event so the job record settles, then go.
                    cancel_and_settle(&cancel, &mut complete_sub).await;
                    return reject(CloseCode::Normal, "client disconnected");
                }
                Some(Ok(_)) => {
                    cancel_and_settle(&cancel, &mut complete_sub).await;
                    return reject(CloseCode::Policy, "unexpected frame");
                }
            }
        }
    }
}

async fn send_frame(session: &mut Session, frame: &ServerFrame) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(frame) {
        Ok(json) => session.text(json).await,
        Err(err) => {
            error!("could not serialize frame: {}", err);
            Ok(())
        }
    }
}

/// Signal the executor and wait (bounded) for its terminal event, leaving
/// teardown to the executor's own exit path on deadline.
async fn cancel_and_settle(cancel: &CancelFlag, complete_sub: &mut Subscription) {
    cancel.cancel();
    let settled = tokio::time::timeout(CANCEL_DEADLINE, async {
        while let Some(event) = complete_sub.recv().await {
            if event.is_terminal() {
                break;
            }
        }
    })
    .await;
    if settled.is_err() {
        warn!("no terminal event within the cancel deadline");
    }
}

/// Run the executor on a blocking worker and publish the terminal event.
///
/// This task owns the job outcome: it runs to the terminal publication
/// even when the session that spawned it is long gone.
pub(crate) async fn launch_job(
    state: AppState,
    job_id: String,
    filename: String,
    language: Language,
    code: String,
    input: InputQueue,
    cancel: CancelFlag,
) {
    metrics::RUNNING_EXECUTIONS.inc();
    let language_label = language.to_string();

    let executor = (state.executors)(language);
    let bus = state.bus.clone();
    let publish_id = job_id.clone();
    let on_output: OutputCallback = Box::new(move |bytes: &[u8]| {
        let event = Event::Output {
            job_id: publish_id.clone(),
            stream: StreamKind::Stdout,
            data: bytes.to_vec(),
        };
        if let Err(err) = bus.publish(&output_topic(&publish_id), event) {
            warn!("could not publish output chunk: {}", err);
        }
    });

    let exec_code = code;
    let exec_filename = filename;
    let result = tokio::task::spawn_blocking(move || {
        executor.execute(&exec_code, &exec_filename, on_output, input, cancel)
    })
    .await
    .unwrap_or_else(|err| Err(anyhow!("executor worker panicked: {}", err)));

    match result {
        Ok(report) => {
            // Out-of-band diagnostics (sanitized build logs) precede the
            // terminal event, marked as the stderr stream.
            if !report.stderr.is_empty() {
                let event = Event::Output {
                    job_id: job_id.clone(),
                    stream: StreamKind::Stderr,
                    data: report.stderr.clone().into_bytes(),
                };
                if let Err(err) = state.bus.publish(&output_topic(&job_id), event) {
                    warn!("could not publish build log: {}", err);
                }
            }
            let event = Event::Complete {
                job_id: job_id.clone(),
                exit_code: report.exit_code,
                elapsed_secs: report.elapsed_secs,
            };
            if let Err(err) = state.bus.publish(&complete_topic(&job_id), event) {
                error!("could not publish terminal event for job {}: {}", job_id, err);
            }

            metrics::EXECUTION_DURATION_SECONDS
                .with_label_values(&[language_label.as_str()])
                .observe(report.elapsed_secs);
            metrics::JOBS_TOTAL
                .with_label_values(&[language_label.as_str(), "completed"])
                .inc();

            if let Err(err) = with_retry(|| state.store.mark_completed(&job_id, report.clone())).await
            {
                error!("could not mark job {} completed: {}", job_id, err);
            }
        }
        Err(err) => {
            let message = format!("execution failed: {:#}", err);
            error!("job {}: {}", job_id, message);
            let event = Event::Error {
                job_id: job_id.clone(),
                message: message.clone(),
            };
            if let Err(err) = state.bus.publish(&complete_topic(&job_id), event) {
                error!("could not publish terminal event for job {}: {}", job_id, err);
            }

            metrics::JOBS_TOTAL
                .with_label_values(&[language_label.as_str(), "failed"])
                .inc();

            if let Err(err) =
                with_retry(|| state.store.mark_failed(&job_id, message.clone(), None)).await
            {
                error!("could not mark job {} failed: {}", job_id, err);
            }
        }
    }

    metrics::RUNNING_EXECUTIONS.dec();
}

/// One retry with jittered backoff, for transient store and bus trouble.
pub(crate) async fn with_retry<T, E, F, Fut>(op: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            let jitter = rand::thread_rng().gen_range(50..150u64);
            warn!("operation failed ({}), retrying in {}ms", first, jitter);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
            op().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppSettings;
    use commons::testing;
    use pretty_assertions::assert_eq;
    use runbox::exec::Executor;
    use runbox::store::JobStore;
    use runbox::{ExecutionReport, JobStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Executor double that writes scripted chunks and returns a report.
    #[derive(Debug)]
    struct ScriptedExecutor {
        chunks: Vec<Vec<u8>>,
        report: Fallible<ExecutionReport>,
    }

    impl Executor for ScriptedExecutor {
        fn execute(
            &self,
            _source: &str,
            _filename: &str,
            mut on_output: OutputCallback,
            _input: InputQueue,
            _cancel: CancelFlag,
        ) -> Fallible<ExecutionReport> {
            for chunk in &self.chunks {
                on_output(chunk);
            }
            match &self.report {
                Ok(report) => Ok(report.clone()),
                Err(err) => Err(anyhow!("{}", err)),
            }
        }
    }

    fn scripted_state(chunks: Vec<Vec<u8>>, report: Fallible<ExecutionReport>) -> AppState {
        let mut state = AppState::new(AppSettings::default()).unwrap();
        let scripted = Arc::new(ScriptedExecutor { chunks, report });
        state.executors = Arc::new(move |_| {
            let boxed: Box<dyn Executor> = Box::new(ScriptedExecutor {
                chunks: scripted.chunks.clone(),
                report: match &scripted.report {
                    Ok(report) => Ok(report.clone()),
                    Err(err) => Err(anyhow!("{}", err)),
                },
            });
            boxed
        });
        state
    }

    fn ok_report(stdout: &str) -> ExecutionReport {
        ExecutionReport {
            success: true,
            exit_code: 0,
            elapsed_secs: 0.05,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    async fn queued_job(state: &AppState) -> String {
        let ticket = state
            .store
            .create(
                "print(\"hi\")".to_string(),
                Language::Python,
                "main.py".to_string(),
            )
            .await
            .unwrap();
        state.store.mark_processing(&ticket.job_id).await.unwrap();
        ticket.job_id
    }

    #[test]
    fn launch_publishes_output_then_single_terminal() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        rt.block_on(async {
            let state = scripted_state(vec![b"hi\n".to_vec()], Ok(ok_report("hi\n")));
            let job_id = queued_job(&state).await;

            let mut output_sub = state.bus.subscribe(&output_topic(&job_id));
            let mut complete_sub = state.bus.subscribe(&complete_topic(&job_id));
            let (_input_tx, input_rx) =
                tokio::sync::mpsc::channel(INPUT_QUEUE_CAPACITY);

            launch_job(
                state.clone(),
                job_id.clone(),
                "main.py".to_string(),
                Language::Python,
                "print(\"hi\")".to_string(),
                input_rx,
                CancelFlag::new(),
            )
            .await;

            match output_sub.recv().await {
                Some(Event::Output { stream, data, .. }) => {
                    assert_eq!(stream, StreamKind::Stdout);
                    assert_eq!(data, b"hi\n".to_vec());
                }
                other => panic!("unexpected event {:?}", other),
            }
            match complete_sub.recv().await {
                Some(Event::Complete { exit_code, .. }) => assert_eq!(exit_code, 0),
                other => panic!("unexpected event {:?}", other),
            }
            // Exactly one terminal event; the topic is closed afterwards.
            assert_eq!(complete_sub.recv().await, None);

            let job = state.store.get(&job_id).await.unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.report.as_ref().unwrap().exit_code, 0);
        });
        Ok(())
    }

    #[test]
    fn launch_surfaces_build_log_before_terminal() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        rt.block_on(async {
            let report = ExecutionReport::out_of_band(
                runbox::EXIT_CODE_COMPILE_FAILURE,
                0.2,
                "main.c:1:1: error: expected declaration\n".to_string(),
            );
            let state = scripted_state(vec![], Ok(report));
            let job_id = queued_job(&state).await;

            let mut output_sub = state.bus.subscribe(&output_topic(&job_id));
            let mut complete_sub = state.bus.subscribe(&complete_topic(&job_id));
            let (_input_tx, input_rx) =
                tokio::sync::mpsc::channel(INPUT_QUEUE_CAPACITY);

            launch_job(
                state.clone(),
                job_id.clone(),
                "main.c".to_string(),
                Language::C,
                "int main(){".to_string(),
                input_rx,
                CancelFlag::new(),
            )
            .await;

            match output_sub.recv().await {
                Some(Event::Output { stream, data, .. }) => {
                    assert_eq!(stream, StreamKind::Stderr);
                    assert!(String::from_utf8_lossy(&data).contains("error"));
                }
                other => panic!("unexpected event {:?}", other),
            }
            match complete_sub.recv().await {
                Some(Event::Complete { exit_code, .. }) => {
                    assert_eq!(exit_code, runbox::EXIT_CODE_COMPILE_FAILURE)
                }
                other => panic!("unexpected event {:?}", other),
            }

            let job = state.store.get(&job_id).await.unwrap();
            assert_eq!(job.status, JobStatus::Completed);
        });
        Ok(())
    }

    #[test]
    fn launch_maps_engine_failure_to_error_event() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        rt.block_on(async {
            let state = scripted_state(vec![], Err(anyhow!("could not spawn sandbox")));
            let job_id = queued_job(&state).await;

            let mut complete_sub = state.bus.subscribe(&complete_topic(&job_id));
            let (_input_tx, input_rx) =
                tokio::sync::mpsc::channel(INPUT_QUEUE_CAPACITY);

            launch_job(
                state.clone(),
                job_id.clone(),
                "main.py".to_string(),
                Language::Python,
                "print(1)".to_string(),
                input_rx,
                CancelFlag::new(),
            )
            .await;

            match complete_sub.recv().await {
                Some(Event::Error { message, .. }) => {
                    assert!(message.contains("could not spawn sandbox"))
                }
                other => panic!("unexpected event {:?}", other),
            }

            let job = state.store.get(&job_id).await.unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert!(job.error.unwrap().contains("could not spawn sandbox"));
        });
        Ok(())
    }

    #[test]
    fn retry_recovers_from_one_transient_failure() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        rt.block_on(async {
            let attempts = AtomicUsize::new(0);
            let result: Result<u32, String> = with_retry(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
            assert_eq!(result, Ok(42));
            assert_eq!(attempts.load(Ordering::SeqCst), 2);
        });
        Ok(())
    }

    #[test]
    fn execute_frame_parses_wire_names() {
        let raw = r#"{"type":"execute","jobId":"j1","jobToken":"t1","code":"print(1)","language":"python"}"#;
        match serde_json::from_str::<ClientFrame>(raw).unwrap() {
            ClientFrame::Execute {
                job_id,
                job_token,
                code,
                language,
            } => {
                assert_eq!(job_id, "j1");
                assert_eq!(job_token, "t1");
                assert_eq!(code, "print(1)");
                assert_eq!(language, "python");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn input_frame_parses() {
        let raw = r#"{"type":"input","data":"Alice\n"}"#;
        match serde_json::from_str::<ClientFrame>(raw).unwrap() {
            ClientFrame::Input { data } => assert_eq!(data, "Alice\n"),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn server_frames_serialize_wire_names() {
        let output = ServerFrame::Output {
            stream: "stdout".to_string(),
            data: "hi\n".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&output).unwrap(),
            r#"{"type":"output","stream":"stdout","data":"hi\n"}"#
        );

        let complete = ServerFrame::Complete {
            exit_code: 0,
            execution_time: 1.5,
        };
        assert_eq!(
            serde_json::to_string(&complete).unwrap(),
            r#"{"type":"complete","exit_code":0,"execution_time":1.5}"#
        );

        let error = ServerFrame::Error {
            message: "import of module 'os' is not allowed".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"type":"error","message":"import of module 'os' is not allowed"}"#
        );
    }

    #[test]
    fn event_conversion_is_lossless_for_utf8() {
        let event = Event::Output {
            job_id: "j".to_string(),
            stream: StreamKind::Stdout,
            data: "héllo\n".as_bytes().to_vec(),
        };
        assert_eq!(
            ServerFrame::from(event),
            ServerFrame::Output {
                stream: "stdout".to_string(),
                data: "héllo\n".to_string(),
            }
        );
    }
}

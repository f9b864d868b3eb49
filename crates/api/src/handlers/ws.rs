use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fileflow_core::{ChannelFrame, HelloRequest, LogAppendRequest, RunnerCommand, SchedulerError};

use crate::{error::ApiResult, routes::AppState};

/// Runner推送通道：接收心跳与日志，下发取消指令
pub async fn runner_channel(
    State(state): State<AppState>,
    Path(runner_uid): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let commands = state
        .hub
        .subscribe(runner_uid)
        .await
        .ok_or(SchedulerError::RunnerNotFound { id: runner_uid })?;
    Ok(ws.on_upgrade(move |socket| handle_channel(socket, state, runner_uid, commands)))
}

async fn handle_channel(
    socket: WebSocket,
    state: AppState,
    runner_uid: Uuid,
    mut commands: broadcast::Receiver<RunnerCommand>,
) {
    info!(runner_uid = %runner_uid, "Runner推送通道已连接");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ChannelFrame>(text.as_str()) {
                            Ok(frame) => handle_frame(&state, runner_uid, frame).await,
                            Err(e) => {
                                warn!(runner_uid = %runner_uid, "无法解析通道消息: {}", e);
                                None
                            }
                        };
                        if let Some(reply) = reply {
                            let stop = matches!(
                                reply,
                                ChannelFrame::HelloAck(ack) if !ack.continue_processing
                            );
                            if !send_frame(&mut sender, &reply).await || stop {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket错误: {}", e);
                        break;
                    }
                }
            }
            command = commands.recv() => {
                match command {
                    Ok(command) => {
                        if !send_frame(&mut sender, &ChannelFrame::from(command)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(runner_uid = %runner_uid, skipped, "推送指令积压");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    let _ = sender.close().await;
    debug!(runner_uid = %runner_uid, "Runner推送通道已关闭");
}

async fn handle_frame(state: &AppState, runner_uid: Uuid, frame: ChannelFrame) -> Option<ChannelFrame> {
    match frame {
        ChannelFrame::Hello(request) => {
            let request = HelloRequest {
                runner_uid,
                snapshot: request.snapshot,
            };
            Some(ChannelFrame::HelloAck(state.hub.hello(&request).await))
        }
        ChannelFrame::Log(request) => {
            let request = LogAppendRequest {
                runner_uid,
                line: request.line,
            };
            if let Err(e) = state.hub.append_log(&request).await {
                warn!(runner_uid = %runner_uid, "追加日志失败: {}", e);
            }
            None
        }
        other => {
            debug!("忽略通道消息: {:?}", other);
            None
        }
    }
}

/// 发送一帧，连接已断开时返回false
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ChannelFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("序列化通道消息失败: {}", e);
            true
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fileflow_core::{ChannelFrame, ExecutorSnapshot, HelloRequest, SchedulerError, SchedulerResult};

use super::DispatcherClient;

type ChannelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runner被要求停止的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// 服务端不再承认该runner（租约过期或未知）
    Rejected,
    Cancelled(String),
}

enum ChannelEvent {
    Frame(ChannelFrame),
    Closed,
}

/// 周期性发送心跳，优先使用WebSocket推送通道，连接不可用时退回HTTP
pub struct HeartbeatManager {
    client: Arc<DispatcherClient>,
    runner_uid: Uuid,
    interval: Duration,
}

impl HeartbeatManager {
    pub fn new(client: Arc<DispatcherClient>, runner_uid: Uuid, heartbeat_interval_seconds: u64) -> Self {
        Self {
            client,
            runner_uid,
            interval: Duration::from_secs(heartbeat_interval_seconds.max(1)),
        }
    }

    async fn connect_channel(&self) -> SchedulerResult<ChannelStream> {
        let url = self.client.channel_url(self.runner_uid);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SchedulerError::Network(format!("无效的通道地址 {url}: {e}")))?;
        if let Some(token) = self.client.access_token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SchedulerError::Network(format!("无效的访问令牌: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| SchedulerError::Network(format!("连接推送通道失败: {e}")))?;
        info!(runner_uid = %self.runner_uid, "推送通道已连接");
        Ok(stream)
    }

    /// 启动心跳任务
    ///
    /// 服务端拒绝心跳或推送取消时，通过 `stop_tx` 发出停止原因并结束任务。
    pub fn start(
        self,
        snapshot: watch::Receiver<ExecutorSnapshot>,
        stop_tx: watch::Sender<Option<StopReason>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut channel = match self.connect_channel().await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!("{}，使用HTTP心跳", e);
                    None
                }
            };

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let request = HelloRequest {
                            runner_uid: self.runner_uid,
                            snapshot: snapshot.borrow().clone(),
                        };
                        if let Some(stream) = channel.as_mut() {
                            match send_frame(stream, &ChannelFrame::Hello(request.clone())).await {
                                Ok(()) => continue,
                                Err(e) => {
                                    warn!("通过推送通道发送心跳失败: {}，改用HTTP", e);
                                    channel = None;
                                }
                            }
                        }
                        match self.client.hello(&request).await {
                            Ok(response) if !response.continue_processing => {
                                let _ = stop_tx.send(Some(StopReason::Rejected));
                                break;
                            }
                            Ok(_) => debug!(runner_uid = %self.runner_uid, "心跳成功"),
                            Err(e) => warn!("发送心跳失败: {}", e),
                        }
                    }
                    event = next_event(&mut channel) => {
                        match event {
                            ChannelEvent::Frame(ChannelFrame::HelloAck(response)) => {
                                if !response.continue_processing {
                                    let _ = stop_tx.send(Some(StopReason::Rejected));
                                    break;
                                }
                            }
                            ChannelEvent::Frame(ChannelFrame::Cancel { reason }) => {
                                info!(runner_uid = %self.runner_uid, reason = %reason, "收到取消指令");
                                let _ = stop_tx.send(Some(StopReason::Cancelled(reason)));
                                break;
                            }
                            ChannelEvent::Frame(other) => {
                                debug!("忽略通道消息: {:?}", other);
                            }
                            ChannelEvent::Closed => {
                                warn!("推送通道已断开，改用HTTP心跳");
                                channel = None;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(runner_uid = %self.runner_uid, "心跳任务退出");
                        break;
                    }
                }
            }

            if let Some(mut stream) = channel {
                let _ = stream.close(None).await;
            }
        })
    }
}

async fn send_frame(stream: &mut ChannelStream, frame: &ChannelFrame) -> SchedulerResult<()> {
    let text = serde_json::to_string(frame)?;
    stream
        .send(Message::text(text))
        .await
        .map_err(|e| SchedulerError::Network(e.to_string()))
}

async fn next_event(channel: &mut Option<ChannelStream>) -> ChannelEvent {
    let Some(stream) = channel.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
                Ok(frame) => return ChannelEvent::Frame(frame),
                Err(e) => warn!("无法解析通道消息: {}", e),
            },
            Some(Ok(Message::Close(_))) | None => return ChannelEvent::Closed,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("推送通道错误: {}", e);
                return ChannelEvent::Closed;
            }
        }
    }
}

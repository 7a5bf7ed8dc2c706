//! 推送通道抽象与 WebSocket 实现
//!
//! 通道句柄由创建它的客户端独占，不跨群组共享。上报端只依赖
//! [`PushChannel`] 接口，便于在断连时走 HTTP 兜底。

use crate::track::error::TrackError;
use crate::track::types::ChannelFrame;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 推送通道接口
///
/// `emit` 为尽力投递，失败返回 [`TrackError::ChannelUnavailable`]，
/// 调用方不等待服务端确认。
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// 通道当前是否处于已连接状态
    fn is_connected(&self) -> bool;

    /// 发送一帧事件
    async fn emit(&self, event: &str, data: serde_json::Value) -> Result<()>;
}

/// 基于 WebSocket 的推送通道
///
/// 写入端在重连时整体换新，旧连接的写入端直接丢弃。
pub struct WsChannel {
    writer: Mutex<Option<WsWriter>>,
    connected: AtomicBool,
}

impl WsChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        })
    }

    /// 连接建立后装入新的写入端
    pub async fn install(&self, writer: WsWriter) {
        let mut guard = self.writer.lock().await;
        *guard = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        debug!("[Channel] 写入端已装入，通道进入已连接状态");
    }

    /// 连接断开后释放写入端
    pub async fn clear(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut guard = self.writer.lock().await;
        *guard = None;
        debug!("[Channel] 写入端已释放，通道进入断开状态");
    }

    /// 发送心跳 Ping 帧
    pub async fn ping(&self) -> Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(w) => {
                w.send(WsMessage::Ping(vec![])).await.map_err(|_| {
                    self.connected.store(false, Ordering::SeqCst);
                    TrackError::ChannelUnavailable
                })?;
                Ok(())
            }
            None => Err(TrackError::ChannelUnavailable.into()),
        }
    }
}

#[async_trait]
impl PushChannel for WsChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: &str, data: serde_json::Value) -> Result<()> {
        if !self.is_connected() {
            return Err(TrackError::ChannelUnavailable.into());
        }

        let frame = ChannelFrame::new(event, data);
        let text = serde_json::to_string(&frame)?;

        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(w) => {
                if let Err(e) = w.send(WsMessage::Text(text)).await {
                    // 发送失败视为连接失效，由连接监督任务负责重连
                    self.connected.store(false, Ordering::SeqCst);
                    debug!("[Channel] 发送失败，标记断开: {}", e);
                    return Err(TrackError::ChannelUnavailable.into());
                }
                Ok(())
            }
            None => Err(TrackError::ChannelUnavailable.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_on_disconnected_channel_is_channel_unavailable() {
        let channel = WsChannel::new();
        assert!(!channel.is_connected());

        let err = channel
            .emit("group_location_update", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackError>(),
            Some(TrackError::ChannelUnavailable)
        ));
    }
}

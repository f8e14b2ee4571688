//! UDP 링크 어댑터
//!
//! - 피어 주소록: 엔티티 ID -> 소켓 주소 (`--peer` 옵션과 수신 PDU에서 학습)
//! - 엔진 출력 큐(`QueueOutput`)를 디렉티브 우선 큐와 Filedata 큐로 분배
//! - 송신 태스크는 우선 큐를 항상 먼저 비운다
//!
//! Filedata 큐가 가득 차면 출력의 data light를 꺼서 엔진이 Filedata를 보류하게 한다.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::id::Id;
use crate::output::QueueOutput;
use crate::pdu::{self, PduHeader};
use crate::{Error, Result};

/// 디렉티브 큐 길이
const PRIORITY_QUEUE_DEPTH: usize = 1000;

/// Filedata 큐 길이
const DATA_QUEUE_DEPTH: usize = 10_000;

type Datagram = (Bytes, SocketAddr);

/// UDP 위의 CFDP 링크
pub struct UdpLink {
    socket: Arc<UdpSocket>,
    peers: Arc<DashMap<Id, SocketAddr>>,
    priority_tx: mpsc::Sender<Datagram>,
    data_tx: mpsc::Sender<Datagram>,
}

impl UdpLink {
    /// 소켓 바인딩 후 송신 태스크 시작
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("CFDP link listening on {}", socket.local_addr()?);

        let (priority_tx, priority_rx) = mpsc::channel(PRIORITY_QUEUE_DEPTH);
        let (data_tx, data_rx) = mpsc::channel(DATA_QUEUE_DEPTH);
        tokio::spawn(send_loop(socket.clone(), priority_rx, data_rx));

        Ok(Self {
            socket,
            peers: Arc::new(DashMap::new()),
            priority_tx,
            data_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn add_peer(&self, id: Id, addr: SocketAddr) {
        info!("peer {} -> {}", id, addr);
        self.peers.insert(id, addr);
    }

    pub fn peer(&self, id: &Id) -> Option<SocketAddr> {
        self.peers.get(id).map(|entry| *entry.value())
    }

    /// 데이터그램 하나 수신, 보낸 엔티티의 주소를 기억
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let (len, from) = self.socket.recv_from(buf).await?;
        if let Some(hdr) = PduHeader::peek(&buf[..len]) {
            let origin = hdr.origin();
            if self.peer(&origin) != Some(from) {
                debug!("learned peer {} at {}", origin, from);
                self.peers.insert(origin, from);
            }
        }
        Ok(len)
    }

    /// 엔진 출력 큐를 비워 송신 큐로 분배, 분배한 PDU 수 반환
    pub fn route(&self, output: &QueueOutput) -> usize {
        let mut routed = 0;
        while let Some(out) = output.pop() {
            let Some(addr) = self.peer(&out.partner) else {
                warn!("주소를 모르는 피어 {}, PDU 폐기 ({})", out.partner, out.trans);
                continue;
            };
            let queue = if pdu::is_file_data(&out.bytes) {
                &self.data_tx
            } else {
                &self.priority_tx
            };
            match queue.try_send((out.bytes, addr)) {
                Ok(()) => routed += 1,
                Err(e) => warn!("송신 큐 포화, PDU 폐기 ({}): {}", out.trans, e),
            }
        }

        // Filedata 큐에 자리가 없으면 엔진이 Filedata를 보류
        output.set_data_light(self.data_tx.capacity() > 0);
        routed
    }
}

/// `<id>=<addr>` 형식의 피어 지정 해석
pub fn parse_peer(entry: &str) -> Result<(Id, SocketAddr)> {
    let (id, addr) = entry
        .split_once('=')
        .ok_or_else(|| Error::InvalidRequest(format!("피어는 <id>=<addr> 형식: {}", entry)))?;
    let addr = addr
        .parse()
        .map_err(|e| Error::InvalidRequest(format!("잘못된 주소 '{}': {}", addr, e)))?;
    Ok((id.parse()?, addr))
}

/// 송신 루프: 우선 큐 먼저, 그 다음 Filedata
async fn send_loop(
    socket: Arc<UdpSocket>,
    mut priority_rx: mpsc::Receiver<Datagram>,
    mut data_rx: mpsc::Receiver<Datagram>,
) {
    loop {
        match priority_rx.try_recv() {
            Ok((bytes, addr)) => {
                if let Err(e) = socket.send_to(&bytes, addr).await {
                    warn!("send_to {} 실패: {}", addr, e);
                }
                continue;
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        }

        tokio::select! {
            biased;
            Some((bytes, addr)) = priority_rx.recv() => {
                if let Err(e) = socket.send_to(&bytes, addr).await {
                    warn!("send_to {} 실패: {}", addr, e);
                }
            }
            Some((bytes, addr)) = data_rx.recv() => {
                if let Err(e) = socket.send_to(&bytes, addr).await {
                    warn!("send_to {} 실패: {}", addr, e);
                }
            }
            else => break,
        }
    }
    debug!("send loop finished");
}

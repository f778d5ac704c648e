use axum::body::Body;
use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri, Version};
use pin_project::{pin_project, pinned_drop};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};

// 流方向标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTag {
    // 客户端到上游
    Request,
    // 上游到客户端
    Response,
}

impl ChunkTag {
    #[inline(always)]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkTag::Request => "request",
            ChunkTag::Response => "response",
        }
    }
}

// 一个流数据块，data 为原始数据的拷贝
#[derive(Debug)]
pub struct StreamChunk {
    pub tag: ChunkTag,
    pub data: Bytes,
    pub err: Option<String>,
}

// 流式请求头快照
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
}

// 流式响应头快照
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
}

type Hook = Box<dyn Fn(&MetaStreamContext) + Send + Sync>;
type ChunkHook = Box<dyn Fn(&MetaStreamContext, &StreamChunk) + Send + Sync>;

/// 流式请求的生命周期上下文
///
/// 双向流（WebSocket 升级、HTTP/2 全双工）注册两个流体，
/// 半双工注册一个；所有已注册流体关闭后 on_finish 恰好触发一次。
#[derive(Default)]
pub struct MetaStreamContext {
    // 响应到达钩子
    on_response: Mutex<Vec<Hook>>,
    // 结束钩子
    on_finish: Mutex<Vec<Hook>>,
    // 数据块钩子
    on_chunk: Mutex<Vec<ChunkHook>>,
    // 已注册的流体数量
    registered: AtomicI32,
    // 已关闭的流体数量
    closed: AtomicI32,
    // on_finish 一次性护栏
    finished: AtomicBool,
    // 请求头快照
    request: Mutex<Option<RequestHead>>,
    // 响应头快照
    response: Mutex<Option<ResponseHead>>,
}

impl MetaStreamContext {
    // 注册响应到达钩子
    pub fn on_response(&self, hook: impl Fn(&MetaStreamContext) + Send + Sync + 'static) {
        self.on_response.lock().unwrap().push(Box::new(hook));
    }

    // 注册结束钩子
    pub fn on_finish(&self, hook: impl Fn(&MetaStreamContext) + Send + Sync + 'static) {
        self.on_finish.lock().unwrap().push(Box::new(hook));
    }

    // 注册数据块钩子
    pub fn on_chunk(
        &self,
        hook: impl Fn(&MetaStreamContext, &StreamChunk) + Send + Sync + 'static,
    ) {
        self.on_chunk.lock().unwrap().push(Box::new(hook));
    }

    // 触发响应到达钩子
    pub fn do_on_response(&self) {
        for hook in self.on_response.lock().unwrap().iter() {
            hook(self);
        }
    }

    // 记录请求头快照
    pub fn set_request_head(&self, head: RequestHead) {
        *self.request.lock().unwrap() = Some(head);
    }

    // 请求头快照
    pub fn request_head(&self) -> Option<RequestHead> {
        self.request.lock().unwrap().clone()
    }

    // 记录响应头快照
    pub fn set_response_head(&self, head: ResponseHead) {
        *self.response.lock().unwrap() = Some(head);
    }

    // 响应头快照
    pub fn response_head(&self) -> Option<ResponseHead> {
        self.response.lock().unwrap().clone()
    }

    // 登记一个待关闭的流体
    pub(crate) fn register_body(&self) {
        self.registered.fetch_add(1, Ordering::SeqCst);
    }

    // 某个流体关闭后的回执，所有已注册流体关闭后触发结束钩子
    pub(crate) fn notify_body_closed(&self) {
        let closed = self.closed.fetch_add(1, Ordering::SeqCst) + 1;
        let registered = self.registered.load(Ordering::SeqCst);
        if registered > 0 && closed >= registered {
            self.do_on_finish();
        }
    }

    // 触发结束钩子，保证恰好一次
    fn do_on_finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        for hook in self.on_finish.lock().unwrap().iter() {
            hook(self);
        }
    }

    // 分发一个数据块到所有钩子
    fn fire_chunk(&self, chunk: &StreamChunk) {
        for hook in self.on_chunk.lock().unwrap().iter() {
            hook(self, chunk);
        }
    }
}

/// 被跟踪的流体
///
/// 每个数据帧触发 on_chunk 钩子，流结束或被丢弃时通过
/// 一次性护栏向上下文发出关闭信号
#[pin_project(PinnedDrop)]
pub struct TrackedBody {
    #[pin]
    inner: Body,
    tag: ChunkTag,
    ctx: Arc<MetaStreamContext>,
    closed: bool,
}

impl TrackedBody {
    // 包装一个流体并登记到上下文
    pub fn wrap(body: Body, tag: ChunkTag, ctx: Arc<MetaStreamContext>) -> Body {
        ctx.register_body();
        Body::new(Self {
            inner: body,
            tag,
            ctx,
            closed: false,
        })
    }
}

impl http_body::Body for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.ctx.fire_chunk(&StreamChunk {
                        tag: *this.tag,
                        data: data.clone(),
                        err: None,
                    });
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                this.ctx.fire_chunk(&StreamChunk {
                    tag: *this.tag,
                    data: Bytes::new(),
                    err: Some(err.to_string()),
                });
                if !*this.closed {
                    *this.closed = true;
                    this.ctx.notify_body_closed();
                }
                Poll::Ready(Some(Err(err)))
            }
            None => {
                if !*this.closed {
                    *this.closed = true;
                    this.ctx.notify_body_closed();
                }
                Poll::Ready(None)
            }
        }
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.closed
    }

    #[inline]
    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}

#[pinned_drop]
impl PinnedDrop for TrackedBody {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if !*this.closed {
            *this.closed = true;
            this.ctx.notify_body_closed();
        }
    }
}

// 判断是否为 WebSocket 升级请求
pub fn is_websocket_request(req: &Request<Body>) -> bool {
    let header_is = |name: &str, expected: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case(expected))
    };
    header_is("connection", "upgrade") && header_is("upgrade", "websocket")
}

/// 包装流式请求体
///
/// HTTP/1.1 的 WebSocket 请求体不做包装，升级后客户端数据
/// 全部经由响应侧到达；空请求体也不登记
pub fn wrap_stream_request_body(req: &mut Request<Body>, ctx: &Arc<MetaStreamContext>) {
    use http_body::Body as _;

    if req.body().is_end_stream() {
        return;
    }
    if req.version() < Version::HTTP_2 && is_websocket_request(req) {
        return;
    }

    let body = std::mem::replace(req.body_mut(), Body::empty());
    *req.body_mut() = TrackedBody::wrap(body, ChunkTag::Request, ctx.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::sync::atomic::AtomicUsize;

    /// 结束钩子在所有已注册流体关闭后恰好触发一次
    #[tokio::test]
    async fn test_on_finish_after_all_bodies_closed() {
        let ctx = Arc::new(MetaStreamContext::default());
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        ctx.on_finish(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = TrackedBody::wrap(Body::from("hello"), ChunkTag::Request, ctx.clone());
        let second = TrackedBody::wrap(Body::from("world"), ChunkTag::Response, ctx.clone());

        // 第一个流体读尽后还不能触发
        let collected = first.collect().await.unwrap();
        assert_eq!(collected.to_bytes(), Bytes::from("hello"));
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        // 第二个流体关闭后触发
        drop(second);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    /// 读尽后再丢弃不会重复发出关闭信号
    #[tokio::test]
    async fn test_duplicate_close_is_noop() {
        let ctx = Arc::new(MetaStreamContext::default());
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        ctx.on_finish(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let body = TrackedBody::wrap(Body::from("data"), ChunkTag::Response, ctx.clone());
        let collected = body.collect().await.unwrap();
        assert_eq!(collected.to_bytes(), Bytes::from("data"));

        // collect 内部读尽即关闭，随后的 drop 不再计数
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    /// 数据块钩子收到方向标记与数据拷贝
    #[tokio::test]
    async fn test_chunk_hooks_observe_copies() {
        let ctx = Arc::new(MetaStreamContext::default());
        let chunks = Arc::new(Mutex::new(Vec::new()));

        let sink = chunks.clone();
        ctx.on_chunk(move |_, chunk| {
            sink.lock()
                .unwrap()
                .push((chunk.tag, chunk.data.clone()));
        });

        let body = TrackedBody::wrap(Body::from("payload"), ChunkTag::Request, ctx.clone());
        let _ = body.collect().await.unwrap();

        let seen = chunks.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, ChunkTag::Request);
        assert_eq!(seen[0].1, Bytes::from("payload"));
    }

    /// 未注册任何流体时不触发结束钩子
    #[test]
    fn test_no_finish_without_registered_bodies() {
        let ctx = Arc::new(MetaStreamContext::default());
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        ctx.on_finish(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // 没有注册的流体，直接销毁上下文
        drop(ctx);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    /// WebSocket 升级请求的请求体不被包装
    #[test]
    fn test_websocket_request_body_not_wrapped() {
        let ctx = Arc::new(MetaStreamContext::default());
        let mut req = Request::builder()
            .method(Method::GET)
            .uri("/ws")
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .body(Body::from("frame"))
            .unwrap();

        wrap_stream_request_body(&mut req, &ctx);
        assert_eq!(ctx.registered.load(Ordering::SeqCst), 0);
    }

    /// HTTP/2 请求体正常登记
    #[test]
    fn test_h2_request_body_wrapped() {
        let ctx = Arc::new(MetaStreamContext::default());
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/stream")
            .version(Version::HTTP_2)
            .body(Body::from("frame"))
            .unwrap();

        wrap_stream_request_body(&mut req, &ctx);
        assert_eq!(ctx.registered.load(Ordering::SeqCst), 1);
    }

    /// 空请求体不登记
    #[test]
    fn test_empty_request_body_not_wrapped() {
        let ctx = Arc::new(MetaStreamContext::default());
        let mut req = Request::builder()
            .method(Method::GET)
            .uri("/stream")
            .body(Body::empty())
            .unwrap();

        wrap_stream_request_body(&mut req, &ctx);
        assert_eq!(ctx.registered.load(Ordering::SeqCst), 0);
    }
}

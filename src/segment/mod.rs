//! Segment tree
//!
//! パス階層ごとにミドルウェア・レイアウト・エラールート・アプリラッパーを
//! 蓄積する木。ノードはアリーナに置き、親はインデックスで参照する。

use std::sync::{Arc, OnceLock};

use ahash::AHashMap as Map;
use log::{debug, error};

use crate::{
    context::Context,
    error::{Error, HandlerResult},
    middleware::{BoxedHandler, Handler},
    render::{Component, Layout, RouteDef, render_route},
};

pub type SegmentId = usize;

pub struct Segment<S> {
    /// このノード自身のキー
    pub pattern: String,
    pub middlewares: Vec<BoxedHandler<S>>,
    pub layout: Option<Layout<S>>,
    pub error_route: Option<Arc<RouteDef<S>>>,
    /// ルートでのみ意味を持つ
    pub not_found: Option<Arc<RouteDef<S>>>,
    pub app: Option<Component<S>>,
    pub children: Map<String, SegmentId>,
    pub parent: Option<SegmentId>,
}

impl<S> Segment<S> {
    fn new(pattern: &str, parent: Option<SegmentId>) -> Segment<S> {
        Segment {
            pattern: pattern.to_string(),
            middlewares: Vec::new(),
            layout: None,
            error_route: None,
            not_found: None,
            app: None,
            children: Map::default(),
            parent,
        }
    }
}

/// Frozen tree shared by every segment wrapper once replay is done.
pub(crate) type TreeSlot<S> = Arc<OnceLock<Arc<SegmentTree<S>>>>;

pub struct SegmentTree<S> {
    nodes: Vec<Segment<S>>,
}

impl<S> Default for SegmentTree<S> {
    fn default() -> Self {
        SegmentTree::new()
    }
}

impl<S> SegmentTree<S> {
    pub const ROOT: SegmentId = 0;

    pub fn new() -> SegmentTree<S> {
        SegmentTree {
            nodes: vec![Segment::new("", None)],
        }
    }

    #[inline]
    pub fn get(&self, id: SegmentId) -> &Segment<S> {
        &self.nodes[id]
    }

    #[inline]
    pub fn get_mut(&mut self, id: SegmentId) -> &mut Segment<S> {
        &mut self.nodes[id]
    }

    /// 根を含むノード数
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Child of `parent` keyed by `key`, created when missing.
    pub fn child(&mut self, parent: SegmentId, key: &str) -> SegmentId {
        if let Some(&id) = self.nodes[parent].children.get(key) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Segment::new(key, Some(parent)));
        self.nodes[parent].children.insert(key.to_string(), id);
        id
    }

    /// Walk from `root` along the segments of `path`, creating missing nodes.
    ///
    /// `include_last` が false のときは最後の部分 (ルート自身) をノードにしない。
    pub fn get_or_create_segment(
        &mut self,
        root: SegmentId,
        path: &str,
        include_last: bool,
    ) -> SegmentId {
        let root_pattern = self.nodes[root].pattern.clone();
        let mut current = root;
        // 先頭は root 自身
        for key in pattern_to_segments(path, &root_pattern, include_last)
            .into_iter()
            .skip(1)
        {
            current = self.child(current, &key);
        }
        current
    }

    /// `id` から根までのノード (根が先頭)
    fn lineage(&self, id: SegmentId) -> Vec<SegmentId> {
        let mut ids = Vec::new();
        let mut current = Some(id);
        while let Some(i) = current {
            ids.push(i);
            current = self.nodes[i].parent;
        }
        ids.reverse();
        ids
    }
}

/// Split a path into segment keys, `root` first.
///
/// `{...}` の中の `/` では分割しない。`/`, `*`, `/*` は根だけになる。
pub fn pattern_to_segments(path: &str, root: &str, include_last: bool) -> Vec<String> {
    let mut out = vec![root.to_string()];
    if path == "/" || path == "*" || path == "/*" {
        return out;
    }

    let mut start = 0;
    let mut depth = 0usize;
    for (i, ch) in path.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                if i > 0 {
                    let piece = &path[start..i];
                    if !piece.is_empty() {
                        out.push(piece.to_string());
                    }
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    if include_last {
        let last = &path[start..];
        if !last.is_empty() && last != "*" {
            out.push(last.to_string());
        }
    }
    out
}

/// Flatten the inherited chain for `id`: for every node from the root down,
/// one segment wrapper followed by the node's own middlewares.
pub(crate) fn segment_to_middlewares<S>(
    tree: &SegmentTree<S>,
    slot: &TreeSlot<S>,
    id: SegmentId,
) -> Vec<BoxedHandler<S>>
where
    S: Send + Sync + 'static,
{
    let mut chain: Vec<BoxedHandler<S>> = Vec::new();
    for node in tree.lineage(id) {
        chain.push(Arc::new(SegmentWrapper {
            tree: Arc::clone(slot),
            id: node,
        }));
        chain.extend(tree.get(node).middlewares.iter().cloned());
    }
    chain
}

/// Installs the node's app wrapper and layout for the rest of the chain and
/// recovers errors through the node's error route or the root not-found route.
///
/// 抜けるときは必ず元の描画状態に戻すので、兄弟の枝には影響しない。
struct SegmentWrapper<S> {
    tree: TreeSlot<S>,
    id: SegmentId,
}

#[async_trait::async_trait]
impl<S> Handler<S> for SegmentWrapper<S>
where
    S: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context<S>) -> HandlerResult {
        let Some(tree) = self.tree.get().cloned() else {
            return ctx.next().await;
        };
        let segment = tree.get(self.id);

        let saved = ctx.internals.clone();
        if let Some(app) = &segment.app {
            ctx.internals.app = Some(Arc::clone(app));
        }
        if let Some(layout) = &segment.layout {
            if layout.config.skip_app_wrapper {
                ctx.internals.app = None;
            }
            if layout.config.skip_inherited_layouts {
                ctx.internals.layouts.clear();
            }
            ctx.internals.layouts.push(layout.clone());
        }

        let result = match ctx.next().await {
            Ok(res) => Ok(res),
            Err(err) => recover(&tree, segment, ctx, err).await,
        };

        ctx.internals = saved;
        result
    }
}

async fn recover<S>(
    tree: &SegmentTree<S>,
    segment: &Segment<S>,
    ctx: &mut Context<S>,
    err: Error,
) -> HandlerResult
where
    S: Send + Sync + 'static,
{
    if err.is_protocol_violation() {
        error!("{}", err);
        return Err(err);
    }
    let status = err.status();

    if status == 404 {
        if let Some(not_found) = &tree.get(SegmentTree::<S>::ROOT).not_found {
            debug!("not found: {}", ctx.req.path.pathname());
            ctx.error = Some(err);
            return render_route(ctx, not_found, Some(404)).await;
        }
    }
    if let Some(route) = &segment.error_route {
        debug!("error route at segment \"{}\": {}", segment.pattern, err);
        ctx.error = Some(err);
        return render_route(ctx, route, Some(status)).await;
    }
    Err(err)
}

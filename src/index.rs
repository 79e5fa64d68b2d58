//! Spatial index over building walls and corners.

use rstar::primitives::{GeomWithData, Line};
use rstar::{RTree, AABB};

use crate::geometry::{Footprint, Point, Segment};

/// Sight lines are pulled inward by this amount before occlusion testing so
/// a path anchored on a wall or corner is not occluded by its own anchor.
pub(crate) const SIGHT_EPS: f64 = 1e-6;

type WallEntry = GeomWithData<Line<[f64; 2]>, usize>;
type CornerEntry = GeomWithData<[f64; 2], usize>;

/// Read-only spatial index over building geometry.
///
/// Built once per run from sanitized footprints. The propagation evaluator
/// issues one range query per (source, receiver) pair, so lookups go
/// through R-trees rather than linear scans.
pub struct GeometryIndex {
    walls: Vec<Segment>,
    corners: Vec<Point>,
    wall_tree: RTree<WallEntry>,
    corner_tree: RTree<CornerEntry>,
}

impl GeometryIndex {
    /// Builds the index from sanitized building footprints.
    pub fn build(footprints: &[Footprint]) -> Self {
        let mut walls = Vec::new();
        let mut corners = Vec::new();
        for fp in footprints {
            for ring in fp.rings() {
                corners.extend_from_slice(ring);
                for i in 0..ring.len() {
                    let j = (i + 1) % ring.len();
                    walls.push(Segment::new(ring[i], ring[j]));
                }
            }
        }
        let wall_items: Vec<WallEntry> = walls
            .iter()
            .enumerate()
            .map(|(i, w)| {
                GeomWithData::new(
                    Line::new([w.start.x, w.start.y], [w.end.x, w.end.y]),
                    i,
                )
            })
            .collect();
        let corner_items: Vec<CornerEntry> = corners
            .iter()
            .enumerate()
            .map(|(i, c)| GeomWithData::new([c.x, c.y], i))
            .collect();
        Self {
            walls,
            corners,
            wall_tree: RTree::bulk_load(wall_items),
            corner_tree: RTree::bulk_load(corner_items),
        }
    }

    /// Returns `true` if the index holds no walls.
    pub fn is_empty(&self) -> bool {
        self.walls.is_empty()
    }

    /// Number of indexed wall segments.
    pub fn wall_count(&self) -> usize {
        self.walls.len()
    }

    pub fn wall(&self, idx: usize) -> Segment {
        self.walls[idx]
    }

    pub fn corner(&self, idx: usize) -> Point {
        self.corners[idx]
    }

    /// Indices of wall segments within `max_dist` of `p`, sorted for
    /// deterministic iteration order.
    pub fn walls_within(&self, p: Point, max_dist: f64) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .wall_tree
            .locate_within_distance([p.x, p.y], max_dist * max_dist)
            .map(|e| e.data)
            .collect();
        out.sort_unstable();
        out
    }

    /// Indices of obstacle corners within `max_dist` of `p`, sorted.
    pub fn corners_within(&self, p: Point, max_dist: f64) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .corner_tree
            .locate_within_distance([p.x, p.y], max_dist * max_dist)
            .map(|e| e.data)
            .collect();
        out.sort_unstable();
        out
    }

    /// Returns `true` if `seg` properly crosses any wall.
    pub fn intersects(&self, seg: &Segment) -> bool {
        let min = [
            seg.start.x.min(seg.end.x),
            seg.start.y.min(seg.end.y),
        ];
        let max = [
            seg.start.x.max(seg.end.x),
            seg.start.y.max(seg.end.y),
        ];
        let envelope = AABB::from_corners(min, max);
        self.wall_tree
            .locate_in_envelope_intersecting(&envelope)
            .any(|e| seg.crosses(&self.walls[e.data]))
    }

    /// Returns `true` if the straight segment between `a` and `b` crosses no
    /// building wall. Endpoints are pulled inward so paths that start or end
    /// on a wall or corner are not self-occluded.
    pub fn visible_segment(&self, a: Point, b: Point) -> bool {
        let seg = Segment::new(a, b);
        if seg.length() <= 2.0 * SIGHT_EPS {
            return true;
        }
        !self.intersects(&seg.shrunk(SIGHT_EPS))
    }
}

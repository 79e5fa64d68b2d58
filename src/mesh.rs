//! Adaptive constrained Delaunay meshing of the free space around buildings.
//!
//! Seeds receivers on a subdivision grid, along building walls, and in rows
//! offset from the sources, triangulates with building rings as constraint
//! edges, and refines until every triangle is under the configured area
//! bound or the pass cap is reached.

use std::collections::HashMap;

use rstar::RTree;

use crate::engine::{CancelToken, TriGridConfig};
use crate::error::{NoiseGridError, Result};
use crate::geometry::{
    distance, triangle_area, triangle_centroid, Footprint, Point, Segment,
};
use crate::propagation::SourceSample;

/// Refinement stops after this many passes even when oversized triangles
/// remain; the mesh is then reported as non-converged.
pub const MAX_REFINEMENT_PASSES: usize = 16;

/// Side length of the square domain meshed when there is no input geometry.
pub const DEFAULT_EXTENT: f64 = 100.0;

const MERGE_TOL: f64 = 1e-6;
const AREA_TOL: f64 = 1e-6;

/// Axis-aligned domain bounds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    fn empty() -> Self {
        Self {
            min: Point::new(f64::INFINITY, f64::INFINITY),
            max: Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    fn expand(&mut self, p: Point) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    fn pad(&mut self, amount: f64) {
        self.min.x -= amount;
        self.min.y -= amount;
        self.max.x += amount;
        self.max.y += amount;
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

/// Triangulated receiver mesh.
///
/// Vertices are shared between triangles; each triangle carries the
/// subdivision cell its centroid falls in.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Point>,
    pub triangles: Vec<[usize; 3]>,
    pub cell_ids: Vec<i32>,
    pub bounds: Bounds,
    pub converged: bool,
}

impl Mesh {
    /// Area of triangle `i`.
    pub fn triangle_area(&self, i: usize) -> f64 {
        let [a, b, c] = self.triangles[i];
        triangle_area(self.vertices[a], self.vertices[b], self.vertices[c]).abs()
    }
}

/// Positionally deduplicated point collection; two points within the merge
/// tolerance are the same vertex.
#[derive(Default)]
struct PointSet {
    points: Vec<Point>,
    lookup: HashMap<(i64, i64), usize>,
}

impl PointSet {
    fn key(p: Point) -> (i64, i64) {
        ((p.x / MERGE_TOL).round() as i64, (p.y / MERGE_TOL).round() as i64)
    }

    fn add(&mut self, p: Point) -> usize {
        match self.lookup.entry(Self::key(p)) {
            std::collections::hash_map::Entry::Occupied(e) => *e.get(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let idx = self.points.len();
                self.points.push(p);
                e.insert(idx);
                idx
            }
        }
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

/// Builds the receiver mesh for one run.
pub struct MeshBuilder<'a> {
    footprints: &'a [Footprint],
    samples: &'a [SourceSample],
    cfg: &'a TriGridConfig,
}

impl<'a> MeshBuilder<'a> {
    pub fn new(
        footprints: &'a [Footprint],
        samples: &'a [SourceSample],
        cfg: &'a TriGridConfig,
    ) -> Self {
        Self {
            footprints,
            samples,
            cfg,
        }
    }

    /// Runs seeding, triangulation, and refinement. Returns the mesh and
    /// any warnings (refinement non-convergence is a warning, not an
    /// error). Honors `cancel` between refinement passes.
    pub fn build(&self, cancel: &CancelToken) -> Result<(Mesh, Vec<String>)> {
        let mut warnings = Vec::new();
        let bounds = self.domain_bounds();
        let sample_tree = RTree::bulk_load(
            self.samples
                .iter()
                .map(|s| [s.position.x, s.position.y])
                .collect::<Vec<[f64; 2]>>(),
        );

        let mut points = PointSet::default();
        let mut edges: Vec<(usize, usize)> = Vec::new();
        self.seed_building_rings(&mut points, &mut edges);
        if !edges.is_empty() {
            seed_domain_boundary(bounds, &mut points, &mut edges);
        }
        self.seed_grid(bounds, &sample_tree, &mut points);
        self.seed_receiver_rows(&sample_tree, &mut points);

        let mut triangles = self.triangulate(&points.points, &edges)?;

        let mut pass = 0;
        let converged = loop {
            if cancel.is_cancelled() {
                return Err(NoiseGridError::Cancelled);
            }
            let mut oversized: Vec<(f64, usize)> = triangles
                .iter()
                .enumerate()
                .filter_map(|(i, &[a, b, c])| {
                    let area =
                        triangle_area(points.points[a], points.points[b], points.points[c]).abs();
                    (area > self.cfg.maximum_area + AREA_TOL).then_some((area, i))
                })
                .collect();
            if oversized.is_empty() {
                break true;
            }
            if pass >= MAX_REFINEMENT_PASSES {
                break false;
            }
            pass += 1;
            // Largest first, lowest triangle index on ties.
            oversized.sort_by(|x, y| {
                y.0.partial_cmp(&x.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(x.1.cmp(&y.1))
            });
            let before = points.len();
            for &(_, i) in &oversized {
                let [a, b, c] = triangles[i];
                let centroid =
                    triangle_centroid(points.points[a], points.points[b], points.points[c]);
                if self.seed_allowed(centroid, &sample_tree) {
                    points.add(centroid);
                }
            }
            if points.len() == before {
                break false;
            }
            triangles = self.triangulate(&points.points, &edges)?;
        };
        if !converged {
            let msg = format!(
                "mesh refinement did not reach maximum_area {} within {} passes",
                self.cfg.maximum_area, MAX_REFINEMENT_PASSES
            );
            log::warn!("{msg}");
            warnings.push(msg);
        }

        let cell_ids = self.assign_cells(bounds, &points.points, &triangles);
        Ok((
            Mesh {
                vertices: points.points,
                triangles,
                cell_ids,
                bounds,
                converged,
            },
            warnings,
        ))
    }

    /// Union bbox of buildings and sources padded by the source spacing;
    /// a default square when there is no geometry at all.
    fn domain_bounds(&self) -> Bounds {
        let mut bounds = Bounds::empty();
        for fp in self.footprints {
            for ring in fp.rings() {
                for &p in ring {
                    bounds.expand(p);
                }
            }
        }
        for s in self.samples {
            bounds.expand(s.position);
        }
        if bounds.is_empty() {
            bounds = Bounds {
                min: Point::new(0.0, 0.0),
                max: Point::new(DEFAULT_EXTENT, DEFAULT_EXTENT),
            };
        } else {
            bounds.pad(self.cfg.src_pt_dist.max(1.0));
        }
        bounds
    }

    fn seed_allowed(&self, p: Point, sample_tree: &RTree<[f64; 2]>) -> bool {
        if self.footprints.iter().any(|fp| fp.contains(p)) {
            return false;
        }
        let guard = (self.cfg.min_rec_dist - MERGE_TOL).max(0.0);
        sample_tree
            .locate_within_distance([p.x, p.y], guard * guard)
            .next()
            .is_none()
    }

    /// Building ring vertices plus densified points along long walls become
    /// constraint points; consecutive points become constraint edges. Ring
    /// vertices are exempt from the source spacing rule, so a wall next to
    /// a road can hold receivers closer than `min_rec_dist` to a sample;
    /// the evaluator's distance clamp bounds the level there.
    fn seed_building_rings(&self, points: &mut PointSet, edges: &mut Vec<(usize, usize)>) {
        let spacing = (2.0 * self.cfg.maximum_area).sqrt();
        for fp in self.footprints {
            for ring in fp.rings() {
                let mut ring_idx: Vec<usize> = Vec::new();
                for i in 0..ring.len() {
                    let a = ring[i];
                    let b = ring[(i + 1) % ring.len()];
                    let len = distance(a, b);
                    let pieces = (len / spacing).ceil().max(1.0) as usize;
                    for k in 0..pieces {
                        let t = k as f64 / pieces as f64;
                        let p = Point::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y));
                        ring_idx.push(points.add(p));
                    }
                }
                for w in 0..ring_idx.len() {
                    let a = ring_idx[w];
                    let b = ring_idx[(w + 1) % ring_idx.len()];
                    if a != b {
                        edges.push((a.min(b), a.max(b)));
                    }
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();
    }

    /// Regular (2^subdiv + 1)^2 node grid covering the domain.
    fn seed_grid(&self, bounds: Bounds, sample_tree: &RTree<[f64; 2]>, points: &mut PointSet) {
        let n = 1usize << self.cfg.subdiv_level;
        for iy in 0..=n {
            for ix in 0..=n {
                let p = Point::new(
                    bounds.min.x + bounds.width() * ix as f64 / n as f64,
                    bounds.min.y + bounds.height() * iy as f64 / n as f64,
                );
                if self.seed_allowed(p, sample_tree) {
                    points.add(p);
                }
            }
        }
    }

    /// Receiver rows offset `min_rec_dist` from the sources: two rows
    /// flanking each line source, a 4-point ring around point sources.
    fn seed_receiver_rows(&self, sample_tree: &RTree<[f64; 2]>, points: &mut PointSet) {
        let offset = self.cfg.min_rec_dist;
        for s in self.samples {
            let candidates: Vec<Point> = match s.lateral {
                Some((ux, uy)) => vec![
                    Point::new(s.position.x + ux * offset, s.position.y + uy * offset),
                    Point::new(s.position.x - ux * offset, s.position.y - uy * offset),
                ],
                None => vec![
                    Point::new(s.position.x + offset, s.position.y),
                    Point::new(s.position.x - offset, s.position.y),
                    Point::new(s.position.x, s.position.y + offset),
                    Point::new(s.position.x, s.position.y - offset),
                ],
            };
            for p in candidates {
                if self.seed_allowed(p, sample_tree) {
                    points.add(p);
                }
            }
        }
    }

    /// Delaunay triangulation of the current point set; constrained when
    /// building edges exist. The constrained triangulation covers the region
    /// between the domain boundary ring and the building rings, so building
    /// interiors are holes; any triangle whose centroid still lands inside a
    /// footprint is culled, as are degenerate triangles, and the rest are
    /// normalized counter-clockwise.
    fn triangulate(&self, points: &[Point], edges: &[(usize, usize)]) -> Result<Vec<[usize; 3]>> {
        let raw: Vec<[usize; 3]> = if edges.is_empty() {
            let coords: Vec<delaunator::Point> = points
                .iter()
                .map(|p| delaunator::Point { x: p.x, y: p.y })
                .collect();
            delaunator::triangulate(&coords)
                .triangles
                .chunks(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect()
        } else {
            let coords: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
            let split = split_edges_at_points(points, edges);
            cdt::triangulate_with_edges(&coords, &split)
                .map_err(|e| NoiseGridError::Triangulation(format!("{e:?}")))?
                .into_iter()
                .map(|t| [t.0, t.1, t.2])
                .collect()
        };
        let mut out = Vec::with_capacity(raw.len());
        for [a, b, c] in raw {
            let area = triangle_area(points[a], points[b], points[c]);
            if area.abs() < AREA_TOL {
                continue;
            }
            let centroid = triangle_centroid(points[a], points[b], points[c]);
            if self.footprints.iter().any(|fp| fp.contains(centroid)) {
                continue;
            }
            if area < 0.0 {
                out.push([a, c, b]);
            } else {
                out.push([a, b, c]);
            }
        }
        Ok(out)
    }

    /// Row-major 2^subdiv x 2^subdiv cell index from each triangle centroid.
    fn assign_cells(
        &self,
        bounds: Bounds,
        points: &[Point],
        triangles: &[[usize; 3]],
    ) -> Vec<i32> {
        let n = 1usize << self.cfg.subdiv_level;
        let cw = bounds.width() / n as f64;
        let ch = bounds.height() / n as f64;
        triangles
            .iter()
            .map(|&[a, b, c]| {
                let p = triangle_centroid(points[a], points[b], points[c]);
                if cw <= 0.0 || ch <= 0.0 {
                    return 0;
                }
                let ix = (((p.x - bounds.min.x) / cw).floor() as i64).clamp(0, n as i64 - 1);
                let iy = (((p.y - bounds.min.y) / ch).floor() as i64).clamp(0, n as i64 - 1);
                (iy * n as i64 + ix) as i32
            })
            .collect()
    }
}

/// Closes the padded domain bounds into an outer boundary ring. The
/// constrained triangulation only fills closed contours, so without this
/// ring the building rings alone would leave the free space between them
/// untriangulated.
fn seed_domain_boundary(bounds: Bounds, points: &mut PointSet, edges: &mut Vec<(usize, usize)>) {
    let corners = [
        Point::new(bounds.min.x, bounds.min.y),
        Point::new(bounds.max.x, bounds.min.y),
        Point::new(bounds.max.x, bounds.max.y),
        Point::new(bounds.min.x, bounds.max.y),
    ];
    let idx: Vec<usize> = corners.iter().map(|&c| points.add(c)).collect();
    for i in 0..idx.len() {
        let a = idx[i];
        let b = idx[(i + 1) % idx.len()];
        edges.push((a.min(b), a.max(b)));
    }
}

/// Splits constraint edges at points lying on them so the constrained
/// triangulation never sees a vertex in the interior of a fixed edge.
fn split_edges_at_points(points: &[Point], edges: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut refined = Vec::new();
    for &(a, b) in edges {
        let seg = Segment::new(points[a], points[b]);
        let mut mids: Vec<(usize, f64)> = Vec::new();
        for (i, &p) in points.iter().enumerate() {
            if i == a || i == b {
                continue;
            }
            if seg.contains_point(p, MERGE_TOL) {
                mids.push((i, distance(points[a], p)));
            }
        }
        mids.sort_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut last = a;
        for (idx, _) in mids {
            refined.push((last.min(idx), last.max(idx)));
            last = idx;
        }
        refined.push((last.min(b), last.max(b)));
    }
    refined.sort_unstable();
    refined.dedup();
    refined
}

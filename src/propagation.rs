//! Sound propagation evaluation at mesh vertices.
//!
//! Each receiver folds the contributions of every source sample in the
//! energy domain: free-field direct paths, edge diffraction around
//! obstacles when the direct path is occluded, and specular reflections via
//! image sources. The fold is pure, so vertices can be evaluated in
//! parallel against the shared read-only [`GeometryIndex`].

use std::collections::VecDeque;

use rstar::primitives::GeomWithData;
use rstar::RTree;

use crate::engine::TriGridConfig;
use crate::geometry::{distance, perpendicular, unit, Point, Segment};
use crate::index::GeometryIndex;

/// Level reported for receivers with no audible contribution.
pub const SILENCE_LEVEL_DB: f64 = 0.0;

/// Attenuation applied per diffraction bend, on top of path-length decay.
pub const EDGE_DIFFRACTION_LOSS_DB: f64 = 10.0;

/// An emitting geometry with its sound power level.
///
/// `Point` and `LineString` geometries (and their multi variants) are
/// accepted; line geometries are resampled into point emitters at the
/// configured spacing. The host adapter is expected to have resolved the
/// emission attribute to `level_db` already.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NoiseSource {
    pub geometry: geo_types::Geometry<f64>,
    pub level_db: f64,
}

impl NoiseSource {
    /// Point source at `(x, y)` emitting `level_db`.
    pub fn point(x: f64, y: f64, level_db: f64) -> Self {
        Self {
            geometry: geo_types::Geometry::Point(geo_types::Point::new(x, y)),
            level_db,
        }
    }

    /// Line source (a road) through `coords` emitting `level_db`.
    pub fn line(coords: &[(f64, f64)], level_db: f64) -> Self {
        Self {
            geometry: geo_types::Geometry::LineString(geo_types::LineString::from(
                coords.to_vec(),
            )),
            level_db,
        }
    }
}

/// A densified point emitter derived from a [`NoiseSource`].
///
/// `lateral` is the unit vector perpendicular to the source line at this
/// sample, used by the mesh builder to place receiver rows alongside roads.
/// It is `None` for point sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSample {
    pub position: Point,
    pub level_db: f64,
    pub lateral: Option<(f64, f64)>,
}

fn push_sample(out: &mut Vec<SourceSample>, sample: SourceSample) {
    if let Some(last) = out.last() {
        if distance(last.position, sample.position) < 1e-9 {
            return;
        }
    }
    out.push(sample);
}

fn densify_line(line: &geo_types::LineString<f64>, level_db: f64, spacing: f64, out: &mut Vec<SourceSample>) {
    for seg in line.0.windows(2) {
        let a = Point::from(seg[0]);
        let b = Point::from(seg[1]);
        let len = distance(a, b);
        if len < 1e-9 {
            continue;
        }
        let lateral = perpendicular(unit((b.x - a.x, b.y - a.y)));
        let pieces = (len / spacing).ceil().max(1.0) as usize;
        for k in 0..=pieces {
            let t = k as f64 / pieces as f64;
            let p = Point::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y));
            push_sample(
                out,
                SourceSample {
                    position: p,
                    level_db,
                    lateral: Some(lateral),
                },
            );
        }
    }
}

/// Resamples source geometries into point emitters at `spacing` intervals.
/// Unsupported geometry kinds are skipped with a recorded warning.
pub fn densify_sources(
    sources: &[NoiseSource],
    spacing: f64,
    warnings: &mut Vec<String>,
) -> Vec<SourceSample> {
    let mut out = Vec::new();
    for (i, src) in sources.iter().enumerate() {
        match &src.geometry {
            geo_types::Geometry::Point(p) => push_sample(
                &mut out,
                SourceSample {
                    position: Point::new(p.x(), p.y()),
                    level_db: src.level_db,
                    lateral: None,
                },
            ),
            geo_types::Geometry::MultiPoint(mp) => {
                for p in &mp.0 {
                    push_sample(
                        &mut out,
                        SourceSample {
                            position: Point::new(p.x(), p.y()),
                            level_db: src.level_db,
                            lateral: None,
                        },
                    );
                }
            }
            geo_types::Geometry::Line(l) => {
                densify_line(
                    &geo_types::LineString::from(vec![l.start, l.end]),
                    src.level_db,
                    spacing,
                    &mut out,
                );
            }
            geo_types::Geometry::LineString(ls) => {
                densify_line(ls, src.level_db, spacing, &mut out);
            }
            geo_types::Geometry::MultiLineString(mls) => {
                for ls in &mls.0 {
                    densify_line(ls, src.level_db, spacing, &mut out);
                }
            }
            _ => {
                let msg = format!(
                    "source {i}: only point and line geometries emit, feature skipped"
                );
                log::warn!("{msg}");
                warnings.push(msg);
            }
        }
    }
    out
}

/// Converts a summed received energy back to a level, clamped at the floor.
fn to_level_db(w: f64) -> f64 {
    if w <= 0.0 {
        SILENCE_LEVEL_DB
    } else {
        (10.0 * w.log10()).max(SILENCE_LEVEL_DB)
    }
}

/// Spherical free-field attenuation of a source energy over `dist` meters.
/// Distance is clamped to `min_dist` to keep the divergence finite next to
/// an emitter.
fn free_field_energy(w_src: f64, dist: f64, min_dist: f64) -> f64 {
    let d = dist.max(min_dist);
    w_src / (4.0 * std::f64::consts::PI * d * d)
}

type SampleEntry = GeomWithData<[f64; 2], usize>;

/// Computes the aggregate level received at a point from all sources.
pub struct PropagationEvaluator<'a> {
    index: &'a GeometryIndex,
    samples: &'a [SourceSample],
    cfg: &'a TriGridConfig,
    sample_tree: RTree<SampleEntry>,
}

impl<'a> PropagationEvaluator<'a> {
    pub fn new(index: &'a GeometryIndex, samples: &'a [SourceSample], cfg: &'a TriGridConfig) -> Self {
        let items: Vec<SampleEntry> = samples
            .iter()
            .enumerate()
            .map(|(i, s)| GeomWithData::new([s.position.x, s.position.y], i))
            .collect();
        Self {
            index,
            samples,
            cfg,
            sample_tree: RTree::bulk_load(items),
        }
    }

    /// Aggregate sound level at `receiver`, in dB. Sources beyond
    /// `max_src_dist` are ignored; a receiver with no reachable source
    /// reports [`SILENCE_LEVEL_DB`].
    pub fn level_at(&self, receiver: Point) -> f64 {
        let mut near: Vec<usize> = self
            .sample_tree
            .locate_within_distance(
                [receiver.x, receiver.y],
                self.cfg.max_src_dist * self.cfg.max_src_dist,
            )
            .map(|e| e.data)
            .collect();
        near.sort_unstable();
        let mut w_total = 0.0;
        for idx in near {
            w_total += self.sample_energy(&self.samples[idx], receiver);
        }
        to_level_db(w_total)
    }

    /// Energy received from one sample: direct, diffracted, and reflected
    /// contributions summed.
    fn sample_energy(&self, sample: &SourceSample, receiver: Point) -> f64 {
        let src = sample.position;
        let w_src = 10f64.powf(sample.level_db / 10.0);
        let dist = distance(src, receiver);
        let mut w = 0.0;
        if self.index.visible_segment(src, receiver) {
            w += free_field_energy(w_src, dist, self.cfg.min_rec_dist);
        } else if self.cfg.diffraction_order > 0 {
            w += self.diffraction_energy(src, receiver, w_src);
        }
        if self.cfg.reflexion_order > 0 && self.cfg.wall_alpha < 1.0 {
            w += self.reflection_energy(src, receiver, w_src);
        }
        w
    }

    /// Breadth-first search over corner sequences bending the path around
    /// obstacles, bounded by `diffraction_order`. Only the least-attenuated
    /// candidate contributes.
    fn diffraction_energy(&self, src: Point, receiver: Point, w_src: f64) -> f64 {
        let corners = self.index.corners_within(receiver, self.cfg.max_ref_dist);
        if corners.is_empty() {
            return 0.0;
        }
        let mut best: f64 = 0.0;
        let mut queue: VecDeque<(usize, f64, u32)> = VecDeque::new();
        for &c in &corners {
            let cp = self.index.corner(c);
            if self.index.visible_segment(receiver, cp) {
                queue.push_back((c, distance(receiver, cp), 1));
            }
        }
        while let Some((c, len, bends)) = queue.pop_front() {
            let cp = self.index.corner(c);
            if self.index.visible_segment(cp, src) {
                let total = len + distance(cp, src);
                let w = free_field_energy(w_src, total, self.cfg.min_rec_dist)
                    * 10f64.powf(-(EDGE_DIFFRACTION_LOSS_DB * f64::from(bends)) / 10.0);
                best = best.max(w);
            }
            if bends < self.cfg.diffraction_order {
                for &n in &corners {
                    if n == c {
                        continue;
                    }
                    let np = self.index.corner(n);
                    if self.index.visible_segment(cp, np) {
                        queue.push_back((n, len + distance(cp, np), bends + 1));
                    }
                }
            }
        }
        best
    }

    /// Breadth-first image-source expansion over walls near the receiver,
    /// bounded by `reflexion_order`. Every geometrically valid bounce
    /// sequence contributes, scaled by `(1 - wall_alpha)` per bounce.
    fn reflection_energy(&self, src: Point, receiver: Point, w_src: f64) -> f64 {
        let walls = self.index.walls_within(receiver, self.cfg.max_ref_dist);
        if walls.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        let mut queue: VecDeque<(Point, Vec<usize>)> = VecDeque::new();
        queue.push_back((src, Vec::new()));
        while let Some((image, seq)) = queue.pop_front() {
            for &w in &walls {
                if seq.last() == Some(&w) {
                    continue;
                }
                let next_image = self.index.wall(w).mirror(image);
                let mut next_seq = seq.clone();
                next_seq.push(w);
                if let Some(path_len) = self.trace_reflection(src, receiver, &next_seq) {
                    let bounces = next_seq.len() as i32;
                    total += free_field_energy(w_src, path_len, self.cfg.min_rec_dist)
                        * (1.0 - self.cfg.wall_alpha).powi(bounces);
                }
                if (next_seq.len() as u32) < self.cfg.reflexion_order {
                    queue.push_back((next_image, next_seq));
                }
            }
        }
        total
    }

    /// Validates a bounce sequence by back-tracing the unfolded path from
    /// the receiver. Returns the unfolded path length when every reflection
    /// point lies on its wall and every leg is unobstructed.
    fn trace_reflection(&self, src: Point, receiver: Point, seq: &[usize]) -> Option<f64> {
        let mut images = Vec::with_capacity(seq.len() + 1);
        images.push(src);
        for &w in seq {
            let prev = *images.last().unwrap_or(&src);
            images.push(self.index.wall(w).mirror(prev));
        }
        let mut point = receiver;
        let mut legs: Vec<(Point, Point)> = Vec::with_capacity(seq.len() + 1);
        for k in (0..seq.len()).rev() {
            let wall = self.index.wall(seq[k]);
            let hit = Segment::new(point, images[k + 1]).intersection(&wall)?;
            legs.push((point, hit));
            point = hit;
        }
        legs.push((point, src));
        for &(a, b) in &legs {
            if !self.index.visible_segment(a, b) {
                return None;
            }
        }
        Some(distance(receiver, images[seq.len()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Footprint;

    fn cfg() -> TriGridConfig {
        TriGridConfig {
            max_src_dist: 250.0,
            max_ref_dist: 50.0,
            subdiv_level: 1,
            min_rec_dist: 1.0,
            src_pt_dist: 5.0,
            maximum_area: 100.0,
            reflexion_order: 0,
            diffraction_order: 0,
            wall_alpha: 0.1,
        }
    }

    fn square_footprint(x0: f64, y0: f64, w: f64, h: f64) -> Footprint {
        Footprint::new(
            vec![
                Point::new(x0, y0),
                Point::new(x0 + w, y0),
                Point::new(x0 + w, y0 + h),
                Point::new(x0, y0 + h),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn densify_line_spacing() {
        let src = NoiseSource::line(&[(0.0, 0.0), (10.0, 0.0)], 80.0);
        let mut warnings = Vec::new();
        let samples = densify_sources(&[src], 2.5, &mut warnings);
        assert!(warnings.is_empty());
        assert_eq!(samples.len(), 5);
        assert!((samples[1].position.x - 2.5).abs() < 1e-9);
        let lat = samples[0].lateral.unwrap();
        assert!((lat.0).abs() < 1e-9 && (lat.1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unsupported_geometry_warns() {
        let poly: geo_types::Polygon<f64> = geo_types::Polygon::new(
            geo_types::LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let src = NoiseSource {
            geometry: geo_types::Geometry::Polygon(poly),
            level_db: 70.0,
        };
        let mut warnings = Vec::new();
        let samples = densify_sources(&[src], 5.0, &mut warnings);
        assert!(samples.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn direct_level_decreases_with_distance() {
        let index = GeometryIndex::build(&[]);
        let samples = vec![SourceSample {
            position: Point::new(0.0, 0.0),
            level_db: 90.0,
            lateral: None,
        }];
        let config = cfg();
        let eval = PropagationEvaluator::new(&index, &samples, &config);
        let mut last = f64::INFINITY;
        for d in [2.0, 5.0, 10.0, 50.0, 100.0] {
            let level = eval.level_at(Point::new(d, 0.0));
            assert!(level < last, "level must strictly decrease with distance");
            assert!(level > SILENCE_LEVEL_DB);
            last = level;
        }
    }

    #[test]
    fn source_beyond_max_dist_is_silent() {
        let index = GeometryIndex::build(&[]);
        let samples = vec![SourceSample {
            position: Point::new(0.0, 0.0),
            level_db: 120.0,
            lateral: None,
        }];
        let config = cfg();
        let eval = PropagationEvaluator::new(&index, &samples, &config);
        let level = eval.level_at(Point::new(config.max_src_dist + 10.0, 0.0));
        assert_eq!(level, SILENCE_LEVEL_DB);
    }

    #[test]
    fn fully_absorptive_walls_reflect_nothing() {
        let index = GeometryIndex::build(&[square_footprint(0.0, 0.0, 10.0, 10.0)]);
        let samples = vec![SourceSample {
            position: Point::new(-3.0, 5.0),
            level_db: 90.0,
            lateral: None,
        }];
        let direct_only = cfg();
        let mut reflective = cfg();
        reflective.reflexion_order = 2;
        reflective.wall_alpha = 1.0;
        let receiver = Point::new(-3.0, 2.0);
        let a = PropagationEvaluator::new(&index, &samples, &direct_only).level_at(receiver);
        let b = PropagationEvaluator::new(&index, &samples, &reflective).level_at(receiver);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn single_wall_reflection_adds_exactly_one_bounce() {
        // One square building, source and receiver in front of its west
        // wall: the only valid first-order bounce is off that wall.
        let index = GeometryIndex::build(&[square_footprint(0.0, 0.0, 10.0, 10.0)]);
        let samples = vec![SourceSample {
            position: Point::new(-3.0, 5.0),
            level_db: 90.0,
            lateral: None,
        }];
        let receiver = Point::new(-3.0, 2.0);
        let mut config = cfg();
        config.reflexion_order = 1;
        config.wall_alpha = 0.1;
        let eval = PropagationEvaluator::new(&index, &samples, &config);

        let w_src = 10f64.powf(90.0 / 10.0);
        let direct = free_field_energy(w_src, 3.0, config.min_rec_dist);
        // Image of the source across x = 0 is (3, 5); unfolded path length
        // is |receiver - image|.
        let image = Point::new(3.0, 5.0);
        let bounce = free_field_energy(w_src, distance(receiver, image), config.min_rec_dist)
            * (1.0 - config.wall_alpha);
        let expect = 10.0 * (direct + bounce).log10();
        assert!((eval.level_at(receiver) - expect).abs() < 1e-6);
    }

    #[test]
    fn diffraction_around_thin_building() {
        let index = GeometryIndex::build(&[square_footprint(0.0, 0.0, 10.0, 0.2)]);
        let samples = vec![SourceSample {
            position: Point::new(5.0, -3.0),
            level_db: 90.0,
            lateral: None,
        }];
        let receiver = Point::new(5.0, 3.0);
        let mut blocked = cfg();
        let eval_blocked = PropagationEvaluator::new(&index, &samples, &blocked);
        assert_eq!(eval_blocked.level_at(receiver), SILENCE_LEVEL_DB);
        blocked.diffraction_order = 2;
        let eval_diff = PropagationEvaluator::new(&index, &samples, &blocked);
        let diffracted = eval_diff.level_at(receiver);
        assert!(diffracted > SILENCE_LEVEL_DB);
        // Still quieter than the unobstructed path would be.
        let open = GeometryIndex::build(&[]);
        let eval_open = PropagationEvaluator::new(&open, &samples, &blocked);
        assert!(diffracted < eval_open.level_at(receiver));
    }
}

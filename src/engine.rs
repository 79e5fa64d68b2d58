//! Pipeline orchestration: configuration, input sanitisation, meshing,
//! parallel evaluation, and output record assembly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{NoiseGridError, Result};
use crate::geometry::{polygon_area, Footprint, Point, Segment};
use crate::index::GeometryIndex;
use crate::mesh::MeshBuilder;
use crate::propagation::{densify_sources, NoiseSource, PropagationEvaluator};

/// Vertices are evaluated in parallel batches of this size; the cancel
/// token is honored between batches.
const VERTEX_BATCH: usize = 256;

/// Scalar configuration for one noise-grid run.
///
/// Field meanings follow the original BR_TriGrid parameter list: search
/// radii, subdivision level, receiver spacing constraints, the triangle
/// area bound, and the reflection/diffraction/absorption model limits.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TriGridConfig {
    /// Maximum source-receiver search distance, meters.
    pub max_src_dist: f64,
    /// Maximum receiver-wall search distance, meters. Strictly smaller
    /// than `max_src_dist`.
    pub max_ref_dist: f64,
    /// Quadtree-style subdivision depth: 4^n cells seed base vertex
    /// density and tile the output.
    pub subdiv_level: u32,
    /// Minimum distance between a receiver vertex and any source point.
    pub min_rec_dist: f64,
    /// Spacing of densified emitters along line sources, meters.
    pub src_pt_dist: f64,
    /// Upper bound on output triangle area, square meters.
    pub maximum_area: f64,
    /// Maximum number of wall bounces per reflection path.
    pub reflexion_order: u32,
    /// Maximum number of bends per diffraction path.
    pub diffraction_order: u32,
    /// Fraction of incident energy absorbed at each wall bounce, in [0, 1].
    pub wall_alpha: f64,
}

impl Default for TriGridConfig {
    fn default() -> Self {
        Self {
            max_src_dist: 250.0,
            max_ref_dist: 50.0,
            subdiv_level: 2,
            min_rec_dist: 1.8,
            src_pt_dist: 5.0,
            maximum_area: 300.0,
            reflexion_order: 2,
            diffraction_order: 1,
            wall_alpha: 0.1,
        }
    }
}

impl TriGridConfig {
    /// Rejects out-of-range configurations before any computation starts.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(NoiseGridError::InvalidConfig(msg));
        for (name, value) in [
            ("max_src_dist", self.max_src_dist),
            ("max_ref_dist", self.max_ref_dist),
            ("min_rec_dist", self.min_rec_dist),
            ("src_pt_dist", self.src_pt_dist),
            ("maximum_area", self.maximum_area),
            ("wall_alpha", self.wall_alpha),
        ] {
            if !value.is_finite() {
                return err(format!("{name} must be finite, got {value}"));
            }
        }
        if self.max_ref_dist < 0.0 {
            return err(format!(
                "max_ref_dist must be non-negative, got {}",
                self.max_ref_dist
            ));
        }
        if self.max_src_dist <= self.max_ref_dist {
            return err(format!(
                "max_src_dist ({}) must be greater than max_ref_dist ({})",
                self.max_src_dist, self.max_ref_dist
            ));
        }
        if self.min_rec_dist <= 0.0 {
            return err(format!(
                "min_rec_dist must be positive, got {}",
                self.min_rec_dist
            ));
        }
        if self.src_pt_dist <= 0.0 {
            return err(format!(
                "src_pt_dist must be positive, got {}",
                self.src_pt_dist
            ));
        }
        if self.maximum_area <= 0.0 {
            return err(format!(
                "maximum_area must be positive, got {}",
                self.maximum_area
            ));
        }
        if self.subdiv_level > 15 {
            return err(format!(
                "subdiv_level must be at most 15, got {}",
                self.subdiv_level
            ));
        }
        if !(0.0..=1.0).contains(&self.wall_alpha) {
            return err(format!(
                "wall_alpha must lie in [0, 1], got {}",
                self.wall_alpha
            ));
        }
        Ok(())
    }
}

/// Clonable cancellation flag shared with the host adapter. Checked between
/// refinement passes and between vertex-evaluation batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One output record: a triangle with the levels at its three vertices,
/// the subdivision cell it belongs to, and its sequential id. Serialized
/// field names match the original BR_TriGrid result schema.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TriRecord {
    #[serde(rename = "the_geom")]
    pub geom: geo_types::Triangle<f64>,
    pub db_v1: f32,
    pub db_v2: f32,
    pub db_v3: f32,
    #[serde(rename = "cellid")]
    pub cell_id: i32,
    #[serde(rename = "triid")]
    pub tri_id: i32,
}

/// Result of a noise-grid run: the record stream plus collected warnings
/// and the refinement convergence flag.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NoiseGrid {
    pub records: Vec<TriRecord>,
    pub warnings: Vec<String>,
    pub converged: bool,
}

impl NoiseGrid {
    /// Serializes the record stream as JSON lines, one record per line,
    /// with the original BR_TriGrid field names.
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for r in &self.records {
            out.push_str(&serde_json::to_string(r)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Drives the pipeline: mesh construction, per-vertex evaluation, record
/// assembly.
pub struct TriGridEngine {
    cfg: TriGridConfig,
}

impl TriGridEngine {
    /// Validates the configuration and builds an engine.
    pub fn new(cfg: TriGridConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &TriGridConfig {
        &self.cfg
    }

    pub fn run(
        &self,
        buildings: &[geo_types::Polygon<f64>],
        sources: &[NoiseSource],
    ) -> Result<NoiseGrid> {
        self.run_cancellable(buildings, sources, &CancelToken::new())
    }

    pub fn run_cancellable(
        &self,
        buildings: &[geo_types::Polygon<f64>],
        sources: &[NoiseSource],
        cancel: &CancelToken,
    ) -> Result<NoiseGrid> {
        let mut warnings = Vec::new();
        let footprints = sanitize_buildings(buildings, &mut warnings);
        if footprints.is_empty() && !buildings.is_empty() && sources.is_empty() {
            return Err(NoiseGridError::NoUsableGeometry(
                "every building footprint was degenerate and no sources were supplied".into(),
            ));
        }
        let samples = densify_sources(sources, self.cfg.src_pt_dist, &mut warnings);
        let index = GeometryIndex::build(&footprints);
        if self.cfg.reflexion_order > 0 && index.is_empty() {
            let msg =
                "reflection order > 0 but there are no obstacle walls; reflections cannot contribute"
                    .to_string();
            log::warn!("{msg}");
            warnings.push(msg);
        }
        if cancel.is_cancelled() {
            return Err(NoiseGridError::Cancelled);
        }

        let builder = MeshBuilder::new(&footprints, &samples, &self.cfg);
        let (mesh, mesh_warnings) = builder.build(cancel)?;
        warnings.extend(mesh_warnings);

        let evaluator = PropagationEvaluator::new(&index, &samples, &self.cfg);
        let mut levels: Vec<f64> = Vec::with_capacity(mesh.vertices.len());
        for chunk in mesh.vertices.chunks(VERTEX_BATCH) {
            if cancel.is_cancelled() {
                return Err(NoiseGridError::Cancelled);
            }
            levels.extend(
                chunk
                    .par_iter()
                    .map(|&v| evaluator.level_at(v))
                    .collect::<Vec<f64>>(),
            );
        }

        let records: Vec<TriRecord> = mesh
            .triangles
            .iter()
            .enumerate()
            .map(|(i, &[a, b, c])| TriRecord {
                geom: geo_types::Triangle(
                    mesh.vertices[a].into(),
                    mesh.vertices[b].into(),
                    mesh.vertices[c].into(),
                ),
                db_v1: levels[a] as f32,
                db_v2: levels[b] as f32,
                db_v3: levels[c] as f32,
                cell_id: mesh.cell_ids[i],
                tri_id: i as i32,
            })
            .collect();
        log::debug!(
            "noise grid: {} vertices, {} records, converged = {}",
            mesh.vertices.len(),
            records.len(),
            mesh.converged
        );
        Ok(NoiseGrid {
            records,
            warnings,
            converged: mesh.converged,
        })
    }
}

/// Computes a noise grid in one call. This is the whole public surface the
/// host adapter needs; progress/cancellation-aware hosts can use
/// [`compute_noise_grid_cancellable`].
pub fn compute_noise_grid(
    buildings: &[geo_types::Polygon<f64>],
    sources: &[NoiseSource],
    cfg: &TriGridConfig,
) -> Result<NoiseGrid> {
    TriGridEngine::new(cfg.clone())?.run(buildings, sources)
}

/// Like [`compute_noise_grid`] but honoring a cancellation token between
/// work batches.
pub fn compute_noise_grid_cancellable(
    buildings: &[geo_types::Polygon<f64>],
    sources: &[NoiseSource],
    cfg: &TriGridConfig,
    cancel: &CancelToken,
) -> Result<NoiseGrid> {
    TriGridEngine::new(cfg.clone())?.run_cancellable(buildings, sources, cancel)
}

fn ring_points(ls: &geo_types::LineString<f64>) -> Option<Vec<Point>> {
    let mut pts: Vec<Point> = ls.0.iter().map(|&c| Point::from(c)).collect();
    if pts.len() >= 2 {
        let first = pts[0];
        let last = pts[pts.len() - 1];
        if crate::geometry::distance(first, last) < 1e-9 {
            pts.pop();
        }
    }
    pts.dedup_by(|a, b| crate::geometry::distance(*a, *b) < 1e-9);
    if pts.len() < 3 || polygon_area(&pts) < 1e-9 {
        return None;
    }
    if ring_self_intersects(&pts) {
        return None;
    }
    Some(pts)
}

fn ring_self_intersects(ring: &[Point]) -> bool {
    let n = ring.len();
    for i in 0..n {
        let a = Segment::new(ring[i], ring[(i + 1) % n]);
        for j in (i + 1)..n {
            // Adjacent edges share an endpoint and may not properly cross.
            let b = Segment::new(ring[j], ring[(j + 1) % n]);
            if a.crosses(&b) {
                return true;
            }
        }
    }
    false
}

/// Converts input polygons to sanitized footprints. Degenerate or
/// self-intersecting rings are skipped per feature with a warning.
fn sanitize_buildings(
    buildings: &[geo_types::Polygon<f64>],
    warnings: &mut Vec<String>,
) -> Vec<Footprint> {
    let mut out = Vec::new();
    for (i, poly) in buildings.iter().enumerate() {
        match ring_points(poly.exterior()) {
            Some(exterior) => {
                let mut interiors = Vec::new();
                for (j, hole) in poly.interiors().iter().enumerate() {
                    match ring_points(hole) {
                        Some(ring) => interiors.push(ring),
                        None => {
                            let msg =
                                format!("building {i}: interior ring {j} is degenerate, ignored");
                            log::warn!("{msg}");
                            warnings.push(msg);
                        }
                    }
                }
                out.push(Footprint::new(exterior, interiors));
            }
            None => {
                let msg = format!(
                    "building {i}: degenerate or self-intersecting footprint, feature skipped"
                );
                log::warn!("{msg}");
                warnings.push(msg);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TriGridConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_search_radii() {
        let cfg = TriGridConfig {
            max_src_dist: 10.0,
            max_ref_dist: 50.0,
            ..TriGridConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(NoiseGridError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        let cfg = TriGridConfig {
            wall_alpha: 1.5,
            ..TriGridConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = TriGridConfig {
            wall_alpha: -0.1,
            ..TriGridConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_distances() {
        for patch in [
            TriGridConfig {
                min_rec_dist: 0.0,
                ..TriGridConfig::default()
            },
            TriGridConfig {
                src_pt_dist: -1.0,
                ..TriGridConfig::default()
            },
            TriGridConfig {
                maximum_area: 0.0,
                ..TriGridConfig::default()
            },
            TriGridConfig {
                max_src_dist: f64::NAN,
                ..TriGridConfig::default()
            },
        ] {
            assert!(patch.validate().is_err());
        }
    }

    #[test]
    fn rejects_oversized_subdivision() {
        let cfg = TriGridConfig {
            subdiv_level: 64,
            ..TriGridConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(NoiseGridError::InvalidConfig(_))
        ));
    }

    #[test]
    fn degenerate_buildings_are_skipped_with_warning() {
        let line_like = geo_types::Polygon::new(
            geo_types::LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (0.0, 0.0)]),
            vec![],
        );
        let mut warnings = Vec::new();
        let footprints = sanitize_buildings(&[line_like], &mut warnings);
        assert!(footprints.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn self_intersecting_ring_is_rejected() {
        let bowtie = geo_types::Polygon::new(
            geo_types::LineString::from(vec![
                (0.0, 0.0),
                (10.0, 10.0),
                (10.0, 0.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let mut warnings = Vec::new();
        assert!(sanitize_buildings(&[bowtie], &mut warnings).is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn all_degenerate_buildings_without_sources_is_fatal() {
        let line_like = geo_types::Polygon::new(
            geo_types::LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (0.0, 0.0)]),
            vec![],
        );
        let result = compute_noise_grid(&[line_like], &[], &TriGridConfig::default());
        assert!(matches!(result, Err(NoiseGridError::NoUsableGeometry(_))));
    }

    #[test]
    fn cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = compute_noise_grid_cancellable(
            &[],
            &[],
            &TriGridConfig::default(),
            &cancel,
        );
        assert!(matches!(result, Err(NoiseGridError::Cancelled)));
    }

    #[test]
    fn json_lines_emits_one_line_per_record() {
        let cfg = TriGridConfig::default();
        let grid = compute_noise_grid(&[], &[], &cfg).unwrap();
        let text = grid.to_json_lines().unwrap();
        assert_eq!(text.lines().count(), grid.records.len());
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert!(first.get("the_geom").is_some());
    }

    #[test]
    fn record_serialization_matches_output_contract() {
        let record = TriRecord {
            geom: geo_types::Triangle(
                geo_types::Coord { x: 0.0, y: 0.0 },
                geo_types::Coord { x: 1.0, y: 0.0 },
                geo_types::Coord { x: 0.0, y: 1.0 },
            ),
            db_v1: 55.0,
            db_v2: 54.0,
            db_v3: 53.0,
            cell_id: 3,
            tri_id: 42,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("the_geom").is_some());
        assert!(json.get("cellid").is_some());
        assert!(json.get("triid").is_some());
        assert!(json.get("db_v2").is_some());
    }
}

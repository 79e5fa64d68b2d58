//! Basic 2D geometry primitives for noise-grid computations.

/// Tolerance used by the geometric predicates in this module.
pub const GEOM_EPS: f64 = 1e-9;

/// Representation of a 2D point.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<geo_types::Coord<f64>> for Point {
    fn from(c: geo_types::Coord<f64>) -> Self {
        Point::new(c.x, c.y)
    }
}

impl From<Point> for geo_types::Coord<f64> {
    fn from(p: Point) -> Self {
        geo_types::Coord { x: p.x, y: p.y }
    }
}

/// Calculates the distance between two points.
pub fn distance(a: Point, b: Point) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

/// Normalizes a direction vector. Returns the zero vector for degenerate input.
pub fn unit(v: (f64, f64)) -> (f64, f64) {
    let len = (v.0 * v.0 + v.1 * v.1).sqrt();
    if len.abs() < f64::EPSILON {
        (0.0, 0.0)
    } else {
        (v.0 / len, v.1 / len)
    }
}

/// Rotates a vector by 90 degrees counter-clockwise.
pub fn perpendicular(v: (f64, f64)) -> (f64, f64) {
    (-v.1, v.0)
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Determines the intersection of two infinite lines defined by points
/// `(p1, p2)` and `(p3, p4)`. Returns `None` if the lines are parallel.
pub fn line_intersection(p1: Point, p2: Point, p3: Point, p4: Point) -> Option<Point> {
    let denom = (p1.x - p2.x) * (p3.y - p4.y) - (p1.y - p2.y) * (p3.x - p4.x);
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let x_num =
        (p1.x * p2.y - p1.y * p2.x) * (p3.x - p4.x) - (p1.x - p2.x) * (p3.x * p4.y - p3.y * p4.x);
    let y_num =
        (p1.x * p2.y - p1.y * p2.x) * (p3.y - p4.y) - (p1.y - p2.y) * (p3.x * p4.y - p3.y * p4.x);
    Some(Point::new(x_num / denom, y_num / denom))
}

/// Representation of a 2D segment, used for building walls and sight lines.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Returns the length of the segment.
    pub fn length(&self) -> f64 {
        distance(self.start, self.end)
    }

    /// Returns the midpoint of the segment.
    pub fn midpoint(&self) -> Point {
        Point::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    /// Mirrors `p` across the infinite line carrying this segment. Used to
    /// build image sources for specular reflection.
    pub fn mirror(&self, p: Point) -> Point {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        let len2 = dx * dx + dy * dy;
        if len2 < GEOM_EPS {
            return p;
        }
        let t = ((p.x - self.start.x) * dx + (p.y - self.start.y) * dy) / len2;
        let proj = Point::new(self.start.x + t * dx, self.start.y + t * dy);
        Point::new(2.0 * proj.x - p.x, 2.0 * proj.y - p.y)
    }

    /// Returns `true` if `p` lies on the segment within `tol`.
    pub fn contains_point(&self, p: Point, tol: f64) -> bool {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        let len2 = dx * dx + dy * dy;
        if len2 < GEOM_EPS {
            return distance(self.start, p) <= tol;
        }
        let cross = dx * (p.y - self.start.y) - dy * (p.x - self.start.x);
        if cross.abs() / len2.sqrt() > tol {
            return false;
        }
        let t = ((p.x - self.start.x) * dx + (p.y - self.start.y) * dy) / len2;
        (-tol..=1.0 + tol).contains(&t)
    }

    /// Intersection point of two segments, or `None` when they do not meet.
    pub fn intersection(&self, other: &Segment) -> Option<Point> {
        let p = line_intersection(self.start, self.end, other.start, other.end)?;
        let tol = 1e-6;
        if self.contains_point(p, tol) && other.contains_point(p, tol) {
            Some(p)
        } else {
            None
        }
    }

    /// Returns `true` if the interiors of the two segments properly cross.
    /// Contact limited to an endpoint does not count as a crossing.
    pub fn crosses(&self, other: &Segment) -> bool {
        let d1 = orientation(other.start, other.end, self.start);
        let d2 = orientation(other.start, other.end, self.end);
        let d3 = orientation(self.start, self.end, other.start);
        let d4 = orientation(self.start, self.end, other.end);
        ((d1 > GEOM_EPS && d2 < -GEOM_EPS) || (d1 < -GEOM_EPS && d2 > GEOM_EPS))
            && ((d3 > GEOM_EPS && d4 < -GEOM_EPS) || (d3 < -GEOM_EPS && d4 > GEOM_EPS))
    }

    /// Returns a copy with both endpoints pulled inward by `amount`. Sight
    /// lines that start or end on an obstacle corner are shrunk this way so
    /// they are not occluded by their own anchor walls.
    pub fn shrunk(&self, amount: f64) -> Segment {
        let len = self.length();
        if len <= 2.0 * amount {
            return Segment::new(self.midpoint(), self.midpoint());
        }
        let (ux, uy) = unit((self.end.x - self.start.x, self.end.y - self.start.y));
        Segment::new(
            Point::new(self.start.x + ux * amount, self.start.y + uy * amount),
            Point::new(self.end.x - ux * amount, self.end.y - uy * amount),
        )
    }
}

/// Signed area of a polygon ring. Positive for counter-clockwise rings.
pub fn signed_area(vertices: &[Point]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..vertices.len() {
        let j = (i + 1) % vertices.len();
        sum += vertices[i].x * vertices[j].y - vertices[j].x * vertices[i].y;
    }
    sum * 0.5
}

/// Absolute area of a polygon ring.
pub fn polygon_area(vertices: &[Point]) -> f64 {
    signed_area(vertices).abs()
}

/// Returns `true` if point `p` is inside the polygon defined by `poly` using
/// the ray casting algorithm.
pub fn point_in_polygon(p: Point, poly: &[Point]) -> bool {
    let mut inside = false;
    if poly.is_empty() {
        return inside;
    }
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let pi = poly[i];
        let pj = poly[j];
        if ((pi.y > p.y) != (pj.y > p.y))
            && (p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Sanitized building footprint: an exterior ring plus optional interior
/// rings (courtyards). Rings are stored open, without the closing vertex.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Footprint {
    pub exterior: Vec<Point>,
    pub interiors: Vec<Vec<Point>>,
}

impl Footprint {
    pub fn new(exterior: Vec<Point>, interiors: Vec<Vec<Point>>) -> Self {
        Self {
            exterior,
            interiors,
        }
    }

    /// Returns every ring of the footprint, exterior first.
    pub fn rings(&self) -> impl Iterator<Item = &[Point]> {
        std::iter::once(self.exterior.as_slice()).chain(self.interiors.iter().map(Vec::as_slice))
    }

    /// Returns `true` if `p` lies inside the built-up area of the footprint.
    /// Points inside a courtyard count as outside.
    pub fn contains(&self, p: Point) -> bool {
        point_in_polygon(p, &self.exterior) && !self.interiors.iter().any(|r| point_in_polygon(p, r))
    }
}

/// Signed area of the triangle `(a, b, c)`.
pub fn triangle_area(a: Point, b: Point, c: Point) -> f64 {
    orientation(a, b, c) * 0.5
}

/// Centroid of the triangle `(a, b, c)`.
pub fn triangle_centroid(a: Point, b: Point, c: Point) -> Point {
    Point::new((a.x + b.x + c.x) / 3.0, (a.y + b.y + c.y) / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_works() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((distance(a, b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn mirror_across_vertical_wall() {
        let wall = Segment::new(Point::new(0.0, 0.0), Point::new(0.0, 10.0));
        let img = wall.mirror(Point::new(3.0, 4.0));
        assert!((img.x + 3.0).abs() < 1e-9);
        assert!((img.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn segments_cross_and_touch() {
        let a = Segment::new(Point::new(0.0, 0.0), Point::new(2.0, 2.0));
        let b = Segment::new(Point::new(0.0, 2.0), Point::new(2.0, 0.0));
        assert!(a.crosses(&b));
        let touching = Segment::new(Point::new(1.0, 1.0), Point::new(3.0, 1.0));
        let at_end = Segment::new(Point::new(3.0, 1.0), Point::new(5.0, 3.0));
        assert!(!touching.crosses(&at_end));
    }

    #[test]
    fn segment_intersection_point() {
        let a = Segment::new(Point::new(0.0, 0.0), Point::new(4.0, 0.0));
        let b = Segment::new(Point::new(2.0, -1.0), Point::new(2.0, 1.0));
        let p = a.intersection(&b).unwrap();
        assert!((p.x - 2.0).abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
        let c = Segment::new(Point::new(5.0, -1.0), Point::new(5.0, 1.0));
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn point_in_polygon_square() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(point_in_polygon(Point::new(5.0, 5.0), &square));
        assert!(!point_in_polygon(Point::new(15.0, 5.0), &square));
    }

    #[test]
    fn areas() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
        ];
        assert!((signed_area(&square) - 4.0).abs() < 1e-9);
        let tri = triangle_area(Point::new(0.0, 0.0), Point::new(2.0, 0.0), Point::new(0.0, 2.0));
        assert!((tri - 2.0).abs() < 1e-9);
    }
}

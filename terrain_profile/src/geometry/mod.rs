//! Basic geometry primitives shared by the index, profile and path modules.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Representation of a 2D point (plan position).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Representation of a 3D point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Drops the elevation and returns the plan position.
    pub fn xy(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn dot(&self, other: Point3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: Point3) -> Point3 {
        Point3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length(&self) -> f64 {
        self.dot(*self).sqrt()
    }

    /// Returns the unit vector, or `None` for a (near) zero vector.
    pub fn normalized(&self) -> Option<Point3> {
        let len = self.length();
        if len <= f64::EPSILON || !len.is_finite() {
            None
        } else {
            Some(*self * (1.0 / len))
        }
    }

    /// Linear interpolation from `self` (t = 0) to `other` (t = 1).
    pub fn lerp(&self, other: Point3, t: f64) -> Point3 {
        *self + (other - *self) * t
    }

    /// Coordinate along axis 0 (x), 1 (y) or 2 (z).
    pub fn component(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn min(&self, other: Point3) -> Point3 {
        Point3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(&self, other: Point3) -> Point3 {
        Point3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Point3 {
    type Output = Point3;

    fn mul(self, rhs: f64) -> Point3 {
        Point3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Calculates the Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

/// Calculates the Euclidean distance between two 3D points.
pub fn distance3(a: Point3, b: Point3) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2) + (b.z - a.z).powi(2)).sqrt()
}

/// Horizontal distance between two 3D points.
pub fn distance_2d(a: Point3, b: Point3) -> f64 {
    distance(a.xy(), b.xy())
}

/// A surface triangle given by its three corner points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub a: Point3,
    pub b: Point3,
    pub c: Point3,
}

impl Triangle {
    pub fn new(a: Point3, b: Point3, c: Point3) -> Self {
        Self { a, b, c }
    }

    pub fn vertices(&self) -> [Point3; 3] {
        [self.a, self.b, self.c]
    }

    /// The three sides as `(start, end)` pairs: ab, bc, ca.
    pub fn edges(&self) -> [(Point3, Point3); 3] {
        [(self.a, self.b), (self.b, self.c), (self.c, self.a)]
    }

    pub fn centroid(&self) -> Point3 {
        Point3::new(
            (self.a.x + self.b.x + self.c.x) / 3.0,
            (self.a.y + self.b.y + self.c.y) / 3.0,
            (self.a.z + self.b.z + self.c.z) / 3.0,
        )
    }

    /// Unit face normal following the vertex winding. `None` when the
    /// triangle is degenerate.
    pub fn normal(&self) -> Option<Point3> {
        (self.b - self.a).cross(self.c - self.a).normalized()
    }

    /// Barycentric weights of `p` with respect to the plan projection of the
    /// triangle, or `None` when the projection has no area.
    pub fn barycentric_2d(&self, p: Point) -> Option<(f64, f64, f64)> {
        let (a, b, c) = (self.a, self.b, self.c);
        let det = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
        if det.abs() < f64::EPSILON {
            return None;
        }
        let u = ((b.y - c.y) * (p.x - c.x) + (c.x - b.x) * (p.y - c.y)) / det;
        let v = ((c.y - a.y) * (p.x - c.x) + (a.x - c.x) * (p.y - c.y)) / det;
        let w = 1.0 - u - v;
        Some((u, v, w))
    }

    /// Interpolated elevation at plan position `p` if it lies within the
    /// triangle's plan projection (inclusive of `tol`).
    pub fn elevation_at(&self, p: Point, tol: f64) -> Option<f64> {
        let (u, v, w) = self.barycentric_2d(p)?;
        if u >= -tol && v >= -tol && w >= -tol {
            Some(u * self.a.z + v * self.b.z + w * self.c.z)
        } else {
            None
        }
    }

    /// Returns `true` if `p`, assumed to lie on the triangle's plane, falls
    /// inside the triangle. Uses 3D barycentric coordinates so vertical
    /// faces are handled too.
    pub fn contains_point(&self, p: Point3, tol: f64) -> bool {
        let v0 = self.c - self.a;
        let v1 = self.b - self.a;
        let v2 = p - self.a;
        let d00 = v0.dot(v0);
        let d01 = v0.dot(v1);
        let d11 = v1.dot(v1);
        let d20 = v2.dot(v0);
        let d21 = v2.dot(v1);
        let denom = d00 * d11 - d01 * d01;
        if denom.abs() <= f64::EPSILON {
            return false;
        }
        let u = (d11 * d20 - d01 * d21) / denom;
        let v = (d00 * d21 - d01 * d20) / denom;
        u >= -tol && v >= -tol && u + v <= 1.0 + tol
    }
}

/// Representation of a 3D line segment between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment3 {
    pub start: Point3,
    pub end: Point3,
}

impl Segment3 {
    pub fn new(start: Point3, end: Point3) -> Self {
        Self { start, end }
    }

    /// Returns the length of the segment.
    pub fn length(&self) -> f64 {
        distance3(self.start, self.end)
    }

    /// Returns the length of the segment's plan projection.
    pub fn length_2d(&self) -> f64 {
        distance_2d(self.start, self.end)
    }

    pub fn direction(&self) -> Point3 {
        self.end - self.start
    }

    /// Point at parameter `t` (0 at start, 1 at end).
    pub fn point_at(&self, t: f64) -> Point3 {
        self.start.lerp(self.end, t)
    }
}

/// Decodes a flat `[x, y, z, x, y, z, ...]` position buffer where every nine
/// values form one triangle.
pub fn triangles_from_positions(positions: &[f32]) -> Result<Vec<Triangle>, GeometryError> {
    if positions.len() % 9 != 0 {
        return Err(GeometryError::PositionBufferLength(positions.len()));
    }
    Ok(positions
        .chunks_exact(9)
        .map(|c| {
            Triangle::new(
                Point3::new(c[0] as f64, c[1] as f64, c[2] as f64),
                Point3::new(c[3] as f64, c[4] as f64, c[5] as f64),
                Point3::new(c[6] as f64, c[7] as f64, c[8] as f64),
            )
        })
        .collect())
}

/// Flattens triangles back into a position buffer.
pub fn positions_from_triangles(triangles: &[Triangle]) -> Vec<f32> {
    let mut out = Vec::with_capacity(triangles.len() * 9);
    for t in triangles {
        for v in t.vertices() {
            out.extend_from_slice(&[v.x as f32, v.y as f32, v.z as f32]);
        }
    }
    out
}

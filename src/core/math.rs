use nalgebra::{Matrix3, Vector2, Vector3};

/// Wraps an angle into `(-pi, pi]`.
///
/// Used everywhere a heading residual or composed heading is produced, so
/// that all edge variants agree on the branch cut.
pub fn wrap_to_pi(angle: f64) -> f64 {
    let tau = 2.0 * std::f64::consts::PI;
    let mut a = angle % tau;
    if a <= -std::f64::consts::PI {
        a += tau;
    } else if a > std::f64::consts::PI {
        a -= tau;
    }
    a
}

/// Composition `a (+) b` of two planar rigid transforms `(x, y, theta)`.
pub fn xyt_compose(a: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
    let (s, c) = a.z.sin_cos();
    Vector3::new(
        a.x + c * b.x - s * b.y,
        a.y + s * b.x + c * b.y,
        wrap_to_pi(a.z + b.z),
    )
}

/// Inverse `(-) a` of a planar rigid transform.
pub fn xyt_inverse(a: &Vector3<f64>) -> Vector3<f64> {
    let (s, c) = a.z.sin_cos();
    Vector3::new(-c * a.x - s * a.y, s * a.x - c * a.y, wrap_to_pi(-a.z))
}

/// Relative transform `(-) a (+) b` that carries frame `a` onto frame `b`.
pub fn xyt_relative(a: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
    let (s, c) = a.z.sin_cos();
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    Vector3::new(c * dx + s * dy, -s * dx + c * dy, wrap_to_pi(b.z - a.z))
}

/// Jacobians of `xyt_compose(a, b)` with respect to `a` and `b`.
pub fn xyt_compose_jacobians(a: &Vector3<f64>, b: &Vector3<f64>) -> (Matrix3<f64>, Matrix3<f64>) {
    let (s, c) = a.z.sin_cos();
    let ja = Matrix3::new(
        1.0, 0.0, -s * b.x - c * b.y, //
        0.0, 1.0, c * b.x - s * b.y, //
        0.0, 0.0, 1.0,
    );
    let jb = Matrix3::new(
        c, -s, 0.0, //
        s, c, 0.0, //
        0.0, 0.0, 1.0,
    );
    (ja, jb)
}

/// Jacobian of `xyt_inverse(a)` with respect to `a`.
pub fn xyt_inverse_jacobian(a: &Vector3<f64>) -> Matrix3<f64> {
    let (s, c) = a.z.sin_cos();
    Matrix3::new(
        -c, -s, s * a.x - c * a.y, //
        s, -c, c * a.x + s * a.y, //
        0.0, 0.0, -1.0,
    )
}

/// Least-squares rigid alignment of `points` onto `targets`: the rotation
/// angle and translation minimizing the summed squared point distance.
///
/// Both slices must have equal length. With fewer than two distinct points
/// the rotation is underdetermined and comes out as zero.
pub fn rigid_align_2d(points: &[Vector2<f64>], targets: &[Vector2<f64>]) -> (f64, Vector2<f64>) {
    assert_eq!(points.len(), targets.len());
    if points.is_empty() {
        return (0.0, Vector2::zeros());
    }
    let n = points.len() as f64;
    let pc: Vector2<f64> = points.iter().sum::<Vector2<f64>>() / n;
    let tc: Vector2<f64> = targets.iter().sum::<Vector2<f64>>() / n;
    let mut dot = 0.0;
    let mut cross = 0.0;
    for (p, t) in points.iter().zip(targets) {
        let p = p - pc;
        let t = t - tc;
        dot += p.x * t.x + p.y * t.y;
        cross += p.x * t.y - p.y * t.x;
    }
    let theta = if dot == 0.0 && cross == 0.0 {
        0.0
    } else {
        cross.atan2(dot)
    };
    let (s, c) = theta.sin_cos();
    let rotated = Vector2::new(c * pc.x - s * pc.y, s * pc.x + c * pc.y);
    (theta, tc - rotated)
}

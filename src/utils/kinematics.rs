
pub const WGS84_SEMI_MAJOR_AXIS_METERS:f64 = 6378137.0;
pub const WGS84_INV_FLATTENING:f64 = 298.257223563;

pub const C_METERS_PER_SEC:f64 = 2.99792458e8;

#[derive(Debug)]
pub struct PositionWGS84 {
	pub latitude:f64,
	pub longitude:f64,
	pub height_above_ellipsoid:f64,
}

/// ECEF to geodetic by Newton iteration on the WGS-84 ellipsoid.  Angles
/// are in radians.
pub fn ecef_to_wgs84(x:f64, y:f64, z:f64) -> PositionWGS84 {
	let a:f64 = WGS84_SEMI_MAJOR_AXIS_METERS;
	let finv:f64 = WGS84_INV_FLATTENING;
	let esq:f64 = (2.0 - 1.0/finv) / finv;
	let tolsq:f64 = 1.0e-10;

	let p:f64 = (x*x + y*y).sqrt();
	let longitude:f64 = if p > 1.0e-20 { y.atan2(x) } else { 0.0 };

	let r:f64 = (p*p + z*z).sqrt();
	let sinphi:f64 = if r > 1.0e-20 { z/r } else { 0.0 };

	let mut latitude:f64 = sinphi.asin();
	let mut height:f64 = r - a*(1.0 - sinphi*sinphi/finv);

	for _ in 0..50 {
		let sinphi:f64 = latitude.sin();
		let cosphi:f64 = latitude.cos();

		let n_phi:f64 = a / (1.0 - esq*sinphi*sinphi).sqrt();

		let dp:f64 = p - (n_phi + height)*cosphi;
		let dz:f64 = z - (n_phi*(1.0 - esq) + height)*sinphi;

		height   += sinphi*dz + cosphi*dp;
		latitude += (cosphi*dz - sinphi*dp) / (n_phi + height);

		if dp*dp + dz*dz < tolsq { break; }
	}

	PositionWGS84{ latitude, longitude, height_above_ellipsoid: height }
}

/// Azimuth/elevation (degrees) and range of the displacement dx as seen
/// from the ECEF position x.
pub fn topocentric(x:(f64, f64, f64), dx:(f64, f64, f64)) -> (f64, f64, f64) {
	let obs = ecef_to_wgs84(x.0, x.1, x.2);

	let cl:f64 = obs.longitude.cos();
	let sl:f64 = obs.longitude.sin();
	let cb:f64 = obs.latitude.cos();
	let sb:f64 = obs.latitude.sin();

	let e:f64 = -sl*dx.0    + cl*dx.1;
	let n:f64 = -sb*cl*dx.0 - sb*sl*dx.1 + cb*dx.2;
	let u:f64 =  cb*cl*dx.0 + cb*sl*dx.1 + sb*dx.2;

	let hor_dis:f64 = (e*e + n*n).sqrt();

	let (mut az, el) = if hor_dis < 1.0e-20 { (0.0, 90.0) }
		else { (e.atan2(n).to_degrees(), u.atan2(hor_dis).to_degrees()) };
	if az < 0.0 { az += 360.0; }

	let range:f64 = (dx.0*dx.0 + dx.1*dx.1 + dx.2*dx.2).sqrt();
	(az, el, range)
}

/// Tropospheric delay [m] for a given elevation sine, via the standard-
/// atmosphere two-pass (dry then wet) refraction integral.  Station
/// height, pressure, temperature and humidity default to sea-level
/// standard conditions at the call sites.
pub fn tropo_delay(sinel:f64, hsta:f64, p:f64, tkel:f64, hum:f64, hp:f64, htkel:f64, hhum:f64) -> f64 {
	let a_e:f64 = 6378.137;
	let b0:f64 = 7.839257e-5;
	let tlapse:f64 = -6.5;

	let sinel:f64 = if sinel < 0.0 { 0.0 } else { sinel };

	let tkhum:f64 = tkel + tlapse*(hhum - htkel);
	let atkel:f64 = 7.5*(tkhum - 273.15) / (237.3 + tkhum - 273.15);
	let e0:f64 = 0.0611 * hum * 10f64.powf(atkel);
	let tksea:f64 = tkel - tlapse*htkel;
	let em:f64 = -978.77 / (2.8704e6*tlapse*1.0e-5);
	let tkelh:f64 = tksea + tlapse*hhum;
	let e0sea:f64 = e0 * (tksea/tkelh).powf(4.0*em);
	let tkelp:f64 = tksea + tlapse*hp;
	let psea:f64 = p * (tksea/tkelp).powf(em);

	let mut tropo:f64 = 0.0;
	let mut refsea:f64 = 77.624e-6 / tksea;
	let mut htop:f64 = 1.1385e-5 / refsea;
	refsea *= psea;
	let mut refr:f64 = refsea * ((htop - hsta)/htop).powf(4.0);

	let mut done = false;
	loop {
		let rtop_sq:f64 = (a_e + htop).powi(2) - (a_e + hsta).powi(2)*(1.0 - sinel.powi(2));
		let rtop:f64 = if rtop_sq < 0.0 { 0.0 } else { rtop_sq.sqrt() } - (a_e + hsta)*sinel;

		let a:f64 = -sinel / (htop - hsta);
		let b:f64 = -b0*(1.0 - sinel.powi(2)) / (htop - hsta);

		let mut alpha:[f64; 8] = [0.0; 8];
		alpha[0] = 2.0*a;
		alpha[1] = 2.0*a.powi(2) + 4.0*b/3.0;
		alpha[2] = a*(a.powi(2) + 3.0*b);
		alpha[3] = a.powi(4)/5.0 + 2.4*a.powi(2)*b + 1.2*b.powi(2);
		alpha[4] = 2.0*a*b*(a.powi(2) + 3.0*b)/3.0;
		alpha[5] = b.powi(2)*(6.0*a.powi(2) + 4.0*b)*1.428571e-1;
		if b.powi(2) > 1.0e-35 {
			alpha[6] = a*b.powi(3)/2.0;
			alpha[7] = b.powi(4)/9.0;
		}

		let mut dr:f64 = rtop;
		for i in 0..7 {
			dr += alpha[i]*rtop.powi((i + 2) as i32);
		}
		tropo += dr*refr*1000.0;

		if done { return tropo; }

		// Switch from the dry to the wet component and integrate again
		done = true;
		refsea = (371900.0e-6/tksea - 12.92e-6)/tksea;
		htop = 1.1385e-5*(1255.0/tksea + 0.05)/refsea;
		refr = refsea*e0sea*((htop - hsta)/htop).powf(4.0);
	}
}

#[cfg(test)]
mod tests {

	use super::*;

	#[test]
	fn geodetic_round_trip() {
		// Construct ECEF from a known geodetic point, then invert
		let lat:f64 = 0.6341;
		let lon:f64 = -1.4424;
		let h:f64 = 212.0;
		let a = WGS84_SEMI_MAJOR_AXIS_METERS;
		let esq = (2.0 - 1.0/WGS84_INV_FLATTENING)/WGS84_INV_FLATTENING;
		let n = a / (1.0 - esq*lat.sin().powi(2)).sqrt();
		let x = (n + h)*lat.cos()*lon.cos();
		let y = (n + h)*lat.cos()*lon.sin();
		let z = (n*(1.0 - esq) + h)*lat.sin();

		let pos = ecef_to_wgs84(x, y, z);
		assert!((pos.latitude - lat).abs() < 1.0e-9);
		assert!((pos.longitude - lon).abs() < 1.0e-9);
		assert!((pos.height_above_ellipsoid - h).abs() < 1.0e-3);
	}

	#[test]
	fn zenith_satellite_elevation() {
		// A displacement straight up from a point on the equator
		let x = (WGS84_SEMI_MAJOR_AXIS_METERS, 0.0, 0.0);
		let dx = (2.0e7, 0.0, 0.0);
		let (_, el, range) = topocentric(x, dx);
		assert!((el - 90.0).abs() < 0.01);
		assert!((range - 2.0e7).abs() < 1.0);
	}

	#[test]
	fn tropo_grows_toward_horizon() {
		let zenith = tropo_delay(1.0, 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0);
		let low    = tropo_delay(10f64.to_radians().sin(), 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0);
		assert!(zenith > 1.0 && zenith < 4.0);
		assert!(low > zenith);
	}

}

//! Local sunrise and sunset for a date, location and IANA timezone.
//!
//! Solar declination and the equation of time follow the NOAA low-precision
//! solar position formulas, evaluated in Julian centuries from J2000. All
//! angles are carried in degrees; conversion to radians happens only at the
//! trigonometric calls. Results are rounded to the nearest whole minute,
//! which is the resolution of the device's schedules.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{error::GeometryError, types::GeoLocation};

/// Zenith of the sun's upper limb at the horizon, corrected for refraction.
const HORIZON_ZENITH_DEG: f64 = 90.833;
const J2000_JULIAN_DAY: f64 = 2_451_545.0;
const MINUTES_PER_DAY: f64 = 1_440.0;
const REFINEMENT_PASSES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SunTimes {
    pub date: NaiveDate,
    pub timezone: Tz,
    pub sunrise: NaiveTime,
    /// Wall-clock time only. Near midsummer at high latitudes this can land
    /// just after local midnight and read earlier than `sunrise`.
    pub sunset: NaiveTime,
    /// Sunrise shifted by the configured offset; this is when the light goes off.
    pub adjusted_sunrise: NaiveTime,
    pub sunrise_offset_minutes: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HorizonCrossing {
    Rise,
    Set,
}

impl HorizonCrossing {
    fn hour_angle_sign(self) -> f64 {
        match self {
            Self::Rise => 1.0,
            Self::Set => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SolarParameters {
    declination_deg: f64,
    equation_of_time_min: f64,
}

pub fn compute(
    location: GeoLocation,
    date: NaiveDate,
    timezone: Tz,
    sunrise_offset_minutes: i32,
) -> Result<SunTimes, GeometryError> {
    let sunrise_utc = crossing_utc(location, date, HorizonCrossing::Rise)?;
    let sunset_utc = crossing_utc(location, date, HorizonCrossing::Set)?;

    let sunrise = sunrise_utc.with_timezone(&timezone).time();
    let sunset = sunset_utc.with_timezone(&timezone).time();

    Ok(SunTimes {
        date,
        timezone,
        sunrise,
        sunset,
        adjusted_sunrise: apply_offset(sunrise, sunrise_offset_minutes),
        sunrise_offset_minutes,
    })
}

/// Shifts a time of day by `offset_minutes`, wrapping around midnight.
pub fn apply_offset(time: NaiveTime, offset_minutes: i32) -> NaiveTime {
    let (shifted, _) = time.overflowing_add_signed(Duration::minutes(i64::from(offset_minutes)));
    shifted
}

fn crossing_utc(
    location: GeoLocation,
    date: NaiveDate,
    crossing: HorizonCrossing,
) -> Result<DateTime<Utc>, GeometryError> {
    // Start from approximate solar noon and re-evaluate the sun's position at
    // the estimated crossing; declination moves enough over half a day to
    // matter at high latitudes.
    let mut minutes = 720.0 - 4.0 * location.longitude();
    for _ in 0..REFINEMENT_PASSES {
        let solar = solar_parameters(date, minutes);
        let hour_angle = sunrise_hour_angle_deg(location.latitude(), solar.declination_deg)
            .map_err(|polar| polar.at(location.latitude(), date))?;
        minutes = 720.0
            - 4.0 * (location.longitude() + crossing.hour_angle_sign() * hour_angle)
            - solar.equation_of_time_min;
    }

    let midnight = date.and_time(NaiveTime::MIN);
    let instant = midnight + Duration::minutes(minutes.round() as i64);
    Ok(Utc.from_utc_datetime(&instant))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polar {
    Day,
    Night,
}

impl Polar {
    fn at(self, latitude: f64, date: NaiveDate) -> GeometryError {
        match self {
            Self::Day => GeometryError::PolarDay { latitude, date },
            Self::Night => GeometryError::PolarNight { latitude, date },
        }
    }
}

fn sunrise_hour_angle_deg(latitude_deg: f64, declination_deg: f64) -> Result<f64, Polar> {
    let lat = latitude_deg.to_radians();
    let decl = declination_deg.to_radians();
    let cos_hour_angle =
        HORIZON_ZENITH_DEG.to_radians().cos() / (lat.cos() * decl.cos()) - lat.tan() * decl.tan();

    if cos_hour_angle.is_nan() {
        // Degenerate float input at the poles.
        return Err(if declination_deg * latitude_deg >= 0.0 {
            Polar::Day
        } else {
            Polar::Night
        });
    }
    if cos_hour_angle > 1.0 {
        return Err(Polar::Night);
    }
    if cos_hour_angle < -1.0 {
        return Err(Polar::Day);
    }

    Ok(cos_hour_angle.acos().to_degrees())
}

fn solar_parameters(date: NaiveDate, utc_minutes: f64) -> SolarParameters {
    let julian_day = julian_day_at_midnight(date) + utc_minutes / MINUTES_PER_DAY;
    let t = (julian_day - J2000_JULIAN_DAY) / 36_525.0;

    let mean_longitude = (280.46646 + t * (36_000.76983 + t * 0.0003032)).rem_euclid(360.0);
    let mean_anomaly = 357.52911 + t * (35_999.05029 - 0.0001537 * t);
    let eccentricity = 0.016708634 - t * (0.000042037 + 0.0000001267 * t);

    let m = mean_anomaly.to_radians();
    let equation_of_center = m.sin() * (1.914602 - t * (0.004817 + 0.000014 * t))
        + (2.0 * m).sin() * (0.019993 - 0.000101 * t)
        + (3.0 * m).sin() * 0.000289;

    let omega = (125.04 - 1_934.136 * t).to_radians();
    let apparent_longitude = mean_longitude + equation_of_center - 0.00569 - 0.00478 * omega.sin();

    let mean_obliquity =
        23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.00059 - t * 0.001813))) / 60.0) / 60.0;
    let obliquity = mean_obliquity + 0.00256 * omega.cos();

    let declination_deg = (obliquity.to_radians().sin() * apparent_longitude.to_radians().sin())
        .asin()
        .to_degrees();

    let y = (obliquity.to_radians() / 2.0).tan().powi(2);
    let l0 = mean_longitude.to_radians();
    let e = eccentricity;
    let equation_of_time_min = 4.0
        * (y * (2.0 * l0).sin() - 2.0 * e * m.sin() + 4.0 * e * y * m.sin() * (2.0 * l0).cos()
            - 0.5 * y * y * (4.0 * l0).sin()
            - 1.25 * e * e * (2.0 * m).sin())
        .to_degrees();

    SolarParameters {
        declination_deg,
        equation_of_time_min,
    }
}

fn julian_day_at_midnight(date: NaiveDate) -> f64 {
    // 2000-01-01T00:00Z is JD 2451544.5.
    let days_since_2000 = i64::from(date.num_days_from_ce()) - 730_120;
    J2000_JULIAN_DAY - 0.5 + days_since_2000 as f64
}

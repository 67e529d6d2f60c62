//! 신호 기술자
//!
//! 송신 스트림에 연결되는 신호의 모양(데이터 기술자)과
//! 시간축(도메인 기술자)을 표현한다.

/// 샘플 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Struct,
}

impl SampleType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            SampleType::Int8
                | SampleType::Int16
                | SampleType::Int32
                | SampleType::Int64
                | SampleType::UInt8
                | SampleType::UInt16
                | SampleType::UInt32
                | SampleType::UInt64
        )
    }

    pub fn is_numeric(self) -> bool {
        self != SampleType::Struct
    }
}

/// 선언된 값 범위 (원시값 기준)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub low: f64,
    pub high: f64,
}

impl ValueRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// 유한하고 폭이 0보다 큰 범위
    pub fn is_valid(&self) -> bool {
        self.low.is_finite() && self.high.is_finite() && self.high > self.low
    }

    pub fn fits_within(&self, low: f64, high: f64) -> bool {
        self.low >= low && self.high <= high
    }
}

/// 소스 측 후처리 스케일 (물리값 = raw * scale + offset)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostScaling {
    pub scale: f64,
    pub offset: f64,
    /// 스케일 적용 전 원시 샘플 타입
    pub raw_type: SampleType,
}

/// 데이터 기술자
#[derive(Debug, Clone, PartialEq)]
pub struct DataDescriptor {
    pub name: String,
    pub sample_type: SampleType,
    /// 배열 길이 (스칼라면 None)
    pub dimension: Option<usize>,
    /// 구조체 필드
    pub fields: Vec<DataDescriptor>,
    pub unit: Option<String>,
    pub value_range: Option<ValueRange>,
    pub post_scaling: Option<PostScaling>,
}

impl DataDescriptor {
    pub fn scalar(name: impl Into<String>, sample_type: SampleType) -> Self {
        Self {
            name: name.into(),
            sample_type,
            dimension: None,
            fields: Vec::new(),
            unit: None,
            value_range: None,
            post_scaling: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.value_range = Some(ValueRange::new(low, high));
        self
    }

    pub fn with_post_scaling(mut self, scale: f64, offset: f64, raw_type: SampleType) -> Self {
        self.post_scaling = Some(PostScaling {
            scale,
            offset,
            raw_type,
        });
        self
    }

    pub fn with_dimension(mut self, len: usize) -> Self {
        self.dimension = Some(len);
        self
    }

    pub fn structure(name: impl Into<String>, fields: Vec<DataDescriptor>) -> Self {
        Self {
            fields,
            ..Self::scalar(name, SampleType::Struct)
        }
    }

    /// CAN 메시지 구조: {ID: Int32, Length: Int8, Data: UInt8 x 64}
    pub fn can_message() -> Self {
        Self::structure(
            "CAN",
            vec![
                Self::scalar("ArbId", SampleType::Int32),
                Self::scalar("Length", SampleType::Int8),
                Self::scalar("Data", SampleType::UInt8).with_dimension(64),
            ],
        )
    }

    /// CAN 메시지 구조와 일치하는지 (필드 이름은 보지 않음)
    pub fn is_can_message(&self) -> bool {
        if self.sample_type != SampleType::Struct || self.fields.len() != 3 {
            return false;
        }
        let id = &self.fields[0];
        let len = &self.fields[1];
        let data = &self.fields[2];
        id.sample_type == SampleType::Int32
            && id.dimension.is_none()
            && len.sample_type == SampleType::Int8
            && len.dimension.is_none()
            && data.sample_type == SampleType::UInt8
            && data.dimension == Some(64)
    }

    /// 아날로그로 보낼 수 있는 스칼라 숫자
    pub fn is_numeric_scalar(&self) -> bool {
        self.sample_type.is_numeric() && self.dimension.is_none() && self.fields.is_empty()
    }
}

/// 틱 해상도 (1틱 = num/den 초)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickResolution {
    pub num: u64,
    pub den: u64,
}

impl TickResolution {
    pub fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }

    /// 나노초 해상도
    pub fn nanoseconds() -> Self {
        Self::new(1, 1_000_000_000)
    }

    pub fn microseconds() -> Self {
        Self::new(1, 1_000_000)
    }
}

/// 도메인 (시간축) 기술자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainDescriptor {
    pub resolution: TickResolution,
    /// 선형 규칙 간격 (틱). 비동기 도메인이면 None
    pub linear_delta: Option<u64>,
}

impl DomainDescriptor {
    pub fn new(resolution: TickResolution) -> Self {
        Self {
            resolution,
            linear_delta: None,
        }
    }

    pub fn linear(resolution: TickResolution, delta: u64) -> Self {
        Self {
            resolution,
            linear_delta: Some(delta),
        }
    }

    /// 틱 -> 나노초 (중간 계산은 u128, 넘치면 포화)
    pub fn ticks_to_ns(&self, ticks: u64) -> u64 {
        if self.resolution.den == 0 {
            return 0;
        }
        let ns = ticks as u128 * self.resolution.num as u128 * 1_000_000_000u128
            / self.resolution.den as u128;
        u64::try_from(ns).unwrap_or(u64::MAX)
    }

    /// 샘플 간격 (초). 선형 규칙이 없으면 0
    pub fn sample_interval_secs(&self) -> f64 {
        match self.linear_delta {
            Some(delta) if self.resolution.den != 0 => {
                delta as f64 * self.resolution.num as f64 / self.resolution.den as f64
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_message_shape() {
        assert!(DataDescriptor::can_message().is_can_message());

        let mut wrong = DataDescriptor::can_message();
        wrong.fields[2].dimension = Some(8);
        assert!(!wrong.is_can_message());

        assert!(!DataDescriptor::scalar("x", SampleType::Int32).is_can_message());
        assert!(!DataDescriptor::can_message().is_numeric_scalar());
    }

    #[test]
    fn test_ticks_to_ns() {
        let us = DomainDescriptor::new(TickResolution::microseconds());
        assert_eq!(us.ticks_to_ns(1), 1_000);
        assert_eq!(us.ticks_to_ns(123), 123_000);

        let ns = DomainDescriptor::new(TickResolution::nanoseconds());
        assert_eq!(ns.ticks_to_ns(u64::MAX), u64::MAX);

        let odd = DomainDescriptor::new(TickResolution::new(1, 3));
        assert_eq!(odd.ticks_to_ns(3), 1_000_000_000);
    }

    #[test]
    fn test_sample_interval() {
        let domain = DomainDescriptor::linear(TickResolution::microseconds(), 500);
        assert!((domain.sample_interval_secs() - 0.0005).abs() < 1e-12);
        assert_eq!(DomainDescriptor::new(TickResolution::microseconds()).sample_interval_secs(), 0.0);
    }

    #[test]
    fn test_value_range_validity() {
        assert!(ValueRange::new(-1.0, 1.0).is_valid());
        assert!(!ValueRange::new(1.0, 1.0).is_valid());
        assert!(!ValueRange::new(f64::NAN, 1.0).is_valid());
        assert!(ValueRange::new(-10.0, 10.0).fits_within(i16::MIN as f64, i16::MAX as f64));
    }
}

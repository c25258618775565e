//! One mains cycle of the reference current waveform, one entry per degree.
//!
//! A calibrated phase offset is a rotation of this table, so the table and
//! [`DEGREES_PER_SAMPLE`] must never change once devices are calibrated.

/// 120 current-only samples span 360 degrees
pub const DEGREES_PER_SAMPLE: usize = 3;

/// `round(170 * sin(d))`
#[rustfmt::skip]
pub const REFERENCE_TABLE: [i16; 360] = [
       0,    3,    6,    9,   12,   15,   18,   21,   24,   27,   30,   32,   35,   38,   41,
      44,   47,   50,   53,   55,   58,   61,   64,   66,   69,   72,   75,   77,   80,   82,
      85,   88,   90,   93,   95,   98,  100,  102,  105,  107,  109,  112,  114,  116,  118,
     120,  122,  124,  126,  128,  130,  132,  134,  136,  138,  139,  141,  143,  144,  146,
     147,  149,  150,  151,  153,  154,  155,  156,  158,  159,  160,  161,  162,  163,  163,
     164,  165,  166,  166,  167,  167,  168,  168,  169,  169,  169,  170,  170,  170,  170,
     170,  170,  170,  170,  170,  169,  169,  169,  168,  168,  167,  167,  166,  166,  165,
     164,  163,  163,  162,  161,  160,  159,  158,  156,  155,  154,  153,  151,  150,  149,
     147,  146,  144,  143,  141,  139,  138,  136,  134,  132,  130,  128,  126,  124,  122,
     120,  118,  116,  114,  112,  109,  107,  105,  102,  100,   98,   95,   93,   90,   88,
      85,   82,   80,   77,   75,   72,   69,   66,   64,   61,   58,   55,   53,   50,   47,
      44,   41,   38,   35,   32,   30,   27,   24,   21,   18,   15,   12,    9,    6,    3,
       0,   -3,   -6,   -9,  -12,  -15,  -18,  -21,  -24,  -27,  -30,  -32,  -35,  -38,  -41,
     -44,  -47,  -50,  -53,  -55,  -58,  -61,  -64,  -66,  -69,  -72,  -75,  -77,  -80,  -82,
     -85,  -88,  -90,  -93,  -95,  -98, -100, -102, -105, -107, -109, -112, -114, -116, -118,
    -120, -122, -124, -126, -128, -130, -132, -134, -136, -138, -139, -141, -143, -144, -146,
    -147, -149, -150, -151, -153, -154, -155, -156, -158, -159, -160, -161, -162, -163, -163,
    -164, -165, -166, -166, -167, -167, -168, -168, -169, -169, -169, -170, -170, -170, -170,
    -170, -170, -170, -170, -170, -169, -169, -169, -168, -168, -167, -167, -166, -166, -165,
    -164, -163, -163, -162, -161, -160, -159, -158, -156, -155, -154, -153, -151, -150, -149,
    -147, -146, -144, -143, -141, -139, -138, -136, -134, -132, -130, -128, -126, -124, -122,
    -120, -118, -116, -114, -112, -109, -107, -105, -102, -100,  -98,  -95,  -93,  -90,  -88,
     -85,  -82,  -80,  -77,  -75,  -72,  -69,  -66,  -64,  -61,  -58,  -55,  -53,  -50,  -47,
     -44,  -41,  -38,  -35,  -32,  -30,  -27,  -24,  -21,  -18,  -15,  -12,   -9,   -6,   -3,
];

/// Table degree for sample `index` rotated by `offset` degrees
#[inline(always)]
pub fn table_degree(index: usize, offset: u16) -> usize {
    (index * DEGREES_PER_SAMPLE + offset as usize) % 360
}

#[inline(always)]
pub fn reference_at(index: usize, offset: u16) -> i32 {
    REFERENCE_TABLE[table_degree(index, offset)] as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_cycle_antisymmetric() {
        for d in 0..180 {
            assert_eq!(REFERENCE_TABLE[d], -REFERENCE_TABLE[d + 180]);
        }
    }

    #[test]
    fn peaks() {
        assert_eq!(REFERENCE_TABLE[0], 0);
        assert_eq!(REFERENCE_TABLE[90], 170);
        assert_eq!(REFERENCE_TABLE[270], -170);
    }

    #[test]
    fn degrees_wrap() {
        assert_eq!(table_degree(0, 0), 0);
        assert_eq!(table_degree(119, 0), 357);
        assert_eq!(table_degree(119, 5), 2);
        assert_eq!(table_degree(60, 359), 179);
    }
}

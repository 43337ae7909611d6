use ash::vk;

/// Deals with aligning data

pub fn align(current: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 || current % alignment == 0 {
        current
    } else {
        let remainder = current % alignment;
        current + alignment - remainder
    }
}

pub fn align_down(current: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        current
    } else {
        current - current % alignment
    }
}

fn gcd(mut a: vk::DeviceSize, mut b: vk::DeviceSize) -> vk::DeviceSize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Least common multiple; a zero operand is treated as "no alignment requirement"
pub fn lcm(a: vk::DeviceSize, b: vk::DeviceSize) -> vk::DeviceSize {
    match (a, b) {
        (0, other) | (other, 0) => other,
        (a, b) => a / gcd(a, b) * b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align(0, 4), 0);
        assert_eq!(align(5, 4), 8);
        assert_eq!(align(8, 4), 8);
        assert_eq!(align(7, 0), 7);
        assert_eq!(align_down(7, 4), 4);
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(4, 4), 4);
        assert_eq!(lcm(0, 3), 3);
        assert_eq!(lcm(3, 0), 3);
    }
}

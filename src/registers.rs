//! Register backing store: four typed banks, each resolvable either by a
//! dense fixed-capacity array or a sparse sorted address table.
//!
//! The resolver is a compile-time choice (a generic type parameter), not a
//! runtime branch, matching the original `#ifdef MODBUS_USE_REGISTER_MAPPING`
//! switch in the C source this engine is descended from.

use crate::error::RegisterError;

/// Resolves a 16-bit Modbus address to a slot index in a bank's backing
/// array. Implemented by both the dense and sparse backings.
pub trait AddressResolver {
    fn resolve(&self, addr: u16) -> Option<usize>;
}

/// Dense backing for word banks: `address == slot index`, bounded by the
/// const word capacity `N`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseMap<const N: usize>;

impl<const N: usize> AddressResolver for DenseMap<N> {
    fn resolve(&self, addr: u16) -> Option<usize> {
        let addr = addr as usize;
        if addr < N {
            Some(addr)
        } else {
            None
        }
    }
}

/// Dense backing for bit banks: storage is `BYTES` bytes, so the valid
/// address space is bit positions `0..BYTES*8`. Kept distinct from
/// [`DenseMap`] because a bit bank's slot count (bits) and storage size
/// (bytes) are not the same number, unlike a word bank's.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseBitMap<const BYTES: usize>;

impl<const BYTES: usize> AddressResolver for DenseBitMap<BYTES> {
    fn resolve(&self, addr: u16) -> Option<usize> {
        let addr = addr as usize;
        if addr < BYTES * 8 {
            Some(addr)
        } else {
            None
        }
    }
}

/// Sparse backing: an ordered, immutable `(internal_addr, slot_index)` table
/// resolved by binary search, mirroring the original's
/// `get_register_index` routine.
#[derive(Debug, Clone, Copy)]
pub struct SparseMap<'a> {
    /// Sorted ascending by `internal_addr`. Construction does not re-sort;
    /// an unsorted table silently yields wrong lookups, same as the C table.
    table: &'a [(u16, usize)],
}

impl<'a> SparseMap<'a> {
    pub const fn new(table: &'a [(u16, usize)]) -> Self {
        SparseMap { table }
    }
}

impl<'a> AddressResolver for SparseMap<'a> {
    fn resolve(&self, addr: u16) -> Option<usize> {
        self.table
            .binary_search_by_key(&addr, |&(key, _)| key)
            .ok()
            .map(|i| self.table[i].1)
    }
}

/// A single-bit bank (coils, discrete inputs): `BYTES * 8` addressable bits,
/// little-endian packed (`addr >> 3` selects the byte, `addr & 7` the bit).
pub struct BitBank<R: AddressResolver, const BYTES: usize> {
    resolver: R,
    storage: [u8; BYTES],
}

impl<R: AddressResolver, const BYTES: usize> BitBank<R, BYTES> {
    pub const fn new(resolver: R) -> Self {
        BitBank {
            resolver,
            storage: [0u8; BYTES],
        }
    }

    pub fn is_valid(&self, addr: u16) -> bool {
        self.resolver.resolve(addr).is_some()
    }

    pub fn read(&self, addr: u16) -> Result<bool, RegisterError> {
        let idx = self.resolver.resolve(addr).ok_or(RegisterError)?;
        Ok(get_bit(&self.storage, idx))
    }

    pub fn write(&mut self, addr: u16, value: bool) -> Result<(), RegisterError> {
        let idx = self.resolver.resolve(addr).ok_or(RegisterError)?;
        set_bit(&mut self.storage, idx, value);
        Ok(())
    }

    /// Raw access to the packed storage; ownership never transfers.
    pub fn raw(&self) -> &[u8; BYTES] {
        &self.storage
    }

    pub fn raw_mut(&mut self) -> &mut [u8; BYTES] {
        &mut self.storage
    }
}

/// A 16-bit word bank (holding registers, input registers): `N` addressable
/// words.
pub struct WordBank<R: AddressResolver, const N: usize> {
    resolver: R,
    storage: [u16; N],
}

impl<R: AddressResolver, const N: usize> WordBank<R, N> {
    pub const fn new(resolver: R) -> Self {
        WordBank {
            resolver,
            storage: [0u16; N],
        }
    }

    pub fn is_valid(&self, addr: u16) -> bool {
        self.resolver.resolve(addr).is_some()
    }

    pub fn read(&self, addr: u16) -> Result<u16, RegisterError> {
        let idx = self.resolver.resolve(addr).ok_or(RegisterError)?;
        Ok(self.storage[idx])
    }

    pub fn write(&mut self, addr: u16, value: u16) -> Result<(), RegisterError> {
        let idx = self.resolver.resolve(addr).ok_or(RegisterError)?;
        self.storage[idx] = value;
        Ok(())
    }

    /// Raw access to the backing array; ownership never transfers.
    pub fn raw(&self) -> &[u16; N] {
        &self.storage
    }

    pub fn raw_mut(&mut self) -> &mut [u16; N] {
        &mut self.storage
    }
}

fn get_bit(array: &[u8], bit_pos: usize) -> bool {
    (array[bit_pos >> 3] & (1 << (bit_pos & 0x07))) != 0
}

fn set_bit(array: &mut [u8], bit_pos: usize, value: bool) {
    if value {
        array[bit_pos >> 3] |= 1 << (bit_pos & 0x07);
    } else {
        array[bit_pos >> 3] &= !(1 << (bit_pos & 0x07));
    }
}

/// The four register banks backing one bus. Generic over each bank's
/// resolver so dense and sparse backings can be mixed per bank without
/// dynamic dispatch.
pub struct RegisterStore<CR, DR, HR, IR, const CB: usize, const DB: usize, const HN: usize, const IN: usize>
where
    CR: AddressResolver,
    DR: AddressResolver,
    HR: AddressResolver,
    IR: AddressResolver,
{
    pub coils: BitBank<CR, CB>,
    pub discrete_inputs: BitBank<DR, DB>,
    pub holding_registers: WordBank<HR, HN>,
    pub input_registers: WordBank<IR, IN>,
}

impl<CR, DR, HR, IR, const CB: usize, const DB: usize, const HN: usize, const IN: usize>
    RegisterStore<CR, DR, HR, IR, CB, DB, HN, IN>
where
    CR: AddressResolver,
    DR: AddressResolver,
    HR: AddressResolver,
    IR: AddressResolver,
{
    pub const fn new(coil_resolver: CR, discrete_resolver: DR, holding_resolver: HR, input_resolver: IR) -> Self {
        RegisterStore {
            coils: BitBank::new(coil_resolver),
            discrete_inputs: BitBank::new(discrete_resolver),
            holding_registers: WordBank::new(holding_resolver),
            input_registers: WordBank::new(input_resolver),
        }
    }
}

/// Bank-agnostic accessor surface the dispatcher and master driver code
/// against, so call sites don't have to spell out four resolver type
/// parameters and four capacity consts. Implemented generically for every
/// [`RegisterStore`] instantiation below.
pub trait Registers {
    fn coil_valid(&self, addr: u16) -> bool;
    fn coil_read(&self, addr: u16) -> Result<bool, RegisterError>;
    fn coil_write(&mut self, addr: u16, value: bool) -> Result<(), RegisterError>;

    fn discrete_input_valid(&self, addr: u16) -> bool;
    fn discrete_input_read(&self, addr: u16) -> Result<bool, RegisterError>;

    fn holding_register_valid(&self, addr: u16) -> bool;
    fn holding_register_read(&self, addr: u16) -> Result<u16, RegisterError>;
    fn holding_register_write(&mut self, addr: u16, value: u16) -> Result<(), RegisterError>;

    fn input_register_valid(&self, addr: u16) -> bool;
    fn input_register_read(&self, addr: u16) -> Result<u16, RegisterError>;
}

impl<CR, DR, HR, IR, const CB: usize, const DB: usize, const HN: usize, const IN: usize> Registers
    for RegisterStore<CR, DR, HR, IR, CB, DB, HN, IN>
where
    CR: AddressResolver,
    DR: AddressResolver,
    HR: AddressResolver,
    IR: AddressResolver,
{
    fn coil_valid(&self, addr: u16) -> bool {
        self.coils.is_valid(addr)
    }

    fn coil_read(&self, addr: u16) -> Result<bool, RegisterError> {
        self.coils.read(addr)
    }

    fn coil_write(&mut self, addr: u16, value: bool) -> Result<(), RegisterError> {
        self.coils.write(addr, value)
    }

    fn discrete_input_valid(&self, addr: u16) -> bool {
        self.discrete_inputs.is_valid(addr)
    }

    fn discrete_input_read(&self, addr: u16) -> Result<bool, RegisterError> {
        self.discrete_inputs.read(addr)
    }

    fn holding_register_valid(&self, addr: u16) -> bool {
        self.holding_registers.is_valid(addr)
    }

    fn holding_register_read(&self, addr: u16) -> Result<u16, RegisterError> {
        self.holding_registers.read(addr)
    }

    fn holding_register_write(&mut self, addr: u16, value: u16) -> Result<(), RegisterError> {
        self.holding_registers.write(addr, value)
    }

    fn input_register_valid(&self, addr: u16) -> bool {
        self.input_registers.is_valid(addr)
    }

    fn input_register_read(&self, addr: u16) -> Result<u16, RegisterError> {
        self.input_registers.read(addr)
    }
}

/// Convenience alias for the common all-dense configuration. `CB`/`DB` are
/// the coil/discrete-input bank sizes **in bytes** (giving `CB*8`/`DB*8`
/// addressable bits); `HN`/`IN` are the holding/input register bank sizes
/// in words.
pub type DenseRegisterStore<const CB: usize, const DB: usize, const HN: usize, const IN: usize> =
    RegisterStore<DenseBitMap<CB>, DenseBitMap<DB>, DenseMap<HN>, DenseMap<IN>, CB, DB, HN, IN>;

impl<const CB: usize, const DB: usize, const HN: usize, const IN: usize> Default
    for DenseRegisterStore<CB, DB, HN, IN>
{
    fn default() -> Self {
        RegisterStore::new(DenseBitMap, DenseBitMap, DenseMap, DenseMap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_bank_round_trips_within_capacity() {
        let mut bank: BitBank<DenseBitMap<1>, 1> = BitBank::new(DenseBitMap);
        assert!(bank.is_valid(7));
        assert!(!bank.is_valid(8));
        bank.write(3, true).unwrap();
        assert_eq!(bank.read(3).unwrap(), true);
        assert_eq!(bank.read(2).unwrap(), false);
        assert!(bank.write(8, true).is_err());
    }

    #[test]
    fn sparse_bank_only_accepts_mapped_addresses() {
        static TABLE: [(u16, usize); 3] = [(0x10, 0), (0x20, 1), (0x30, 2)];
        let mut bank: WordBank<SparseMap, 3> = WordBank::new(SparseMap::new(&TABLE));
        assert!(bank.is_valid(0x20));
        assert!(!bank.is_valid(0x21));
        bank.write(0x20, 0xBEEF).unwrap();
        assert_eq!(bank.read(0x20).unwrap(), 0xBEEF);
        assert!(bank.read(0x21).is_err());
    }

    #[test]
    fn bit_packing_is_little_endian_per_byte() {
        let mut bank: BitBank<DenseBitMap<2>, 2> = BitBank::new(DenseBitMap);
        bank.write(0, true).unwrap();
        assert_eq!(bank.raw()[0] & 0x01, 0x01);
        bank.write(9, true).unwrap();
        assert_eq!(bank.raw()[1] & 0x02, 0x02);
    }

    #[test]
    fn invalid_write_leaves_storage_untouched() {
        let mut bank: WordBank<DenseMap<4>, 4> = WordBank::new(DenseMap);
        bank.write(0, 0x1234).unwrap();
        assert!(bank.write(99, 0xFFFF).is_err());
        assert_eq!(bank.read(0).unwrap(), 0x1234);
    }
}

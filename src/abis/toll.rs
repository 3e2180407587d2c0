use alloy::sol;

sol! {
    event VehicleRegistered(address indexed owner, string vehicleId, uint256 timestamp);
    event TollPaid(address indexed payer, string vehicleId, uint256 amount, uint256 tollId, bytes32 zkProofHash, uint256 timestamp);
    event VehicleBlacklisted(string vehicleId, bool isBlacklisted, uint256 timestamp);
}

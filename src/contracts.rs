// src/contracts.rs
//! ABI bindings for the contracts the arcade talks to. Each binding lives in
//! its own module because several contracts share function names (`mint`).

pub mod account {
    use ethers::prelude::abigen;

    abigen!(
        SimpleAccount,
        r#"[
            function execute(address dest, uint256 value, bytes func)
        ]"#,
    );

    abigen!(
        SimpleAccountFactory,
        r#"[
            function getAddress(address owner, uint256 salt) external view returns (address)
            function createAccount(address owner, uint256 salt) external returns (address)
        ]"#,
    );

    abigen!(
        EntryPoint,
        r#"[
            function getNonce(address sender, uint192 key) external view returns (uint256)
        ]"#,
    );
}

pub mod erc20 {
    use ethers::prelude::abigen;

    abigen!(
        Erc20,
        r#"[
            function balanceOf(address account) external view returns (uint256)
            function allowance(address owner, address spender) external view returns (uint256)
            function approve(address spender, uint256 amount) external returns (bool)
            function transfer(address to, uint256 amount) external returns (bool)
            function mint(address to, uint256 amount) external
            function decimals() external view returns (uint8)
            function symbol() external view returns (string)
        ]"#,
    );
}

pub mod nft {
    use ethers::prelude::abigen;

    abigen!(
        ArcadeNft,
        r#"[
            function mint(address to, string uri) external returns (uint256)
            function tokenURI(uint256 tokenId) external view returns (string)
            function ownerOf(uint256 tokenId) external view returns (address)
            function totalSupply() external view returns (uint256)
        ]"#,
    );
}

pub mod game_hub {
    use ethers::prelude::abigen;

    abigen!(
        GameHub,
        r#"[
            function submitGame(string title, string description, string gameUrl, string thumbnailUrl) external
            function claimTokens(uint256 amount) external
            function submitPointsClaim(uint256 points) external
            function approvePointsClaim(uint256 claimId) external
            function rejectPointsClaim(uint256 claimId, string reason) external
            function applyForAdmin(string reason) external
            function stakeTokens(uint256 amount) external
            function unstakeTokens(uint256 amount) external
            event GameSubmitted(uint256 indexed gameId, address indexed developer, string title)
            event PointsClaimSubmitted(uint256 indexed claimId, address indexed player, uint256 points)
        ]"#,
    );
}

pub mod tournament_hub {
    use ethers::prelude::abigen;

    abigen!(
        TournamentHub,
        r#"[
            function createTournament(string name, uint256 entryFee, uint256 maxParticipants, uint256 startTime, uint256 endTime, uint256 gameId) external
            function joinTournament(uint256 tournamentId) external payable
            function endTournament(uint256 tournamentId, address[] winners) external
            function finalizeTournament(uint256 tournamentId) external
            function getParticipants(uint256 tournamentId) external view returns (address[])
            function getPrizePool(uint256 tournamentId) external view returns (uint256)
            event TournamentCreated(uint256 indexed tournamentId, address indexed organizer, string name)
        ]"#,
    );
}
